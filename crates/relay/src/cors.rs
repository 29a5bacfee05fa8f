// CORS layer for the relay's REST surface.
//
// Origins come from `RelayConfig::cors_origins` (`TASKMAN_RELAY_CORS_ORIGINS`,
// comma-separated). `"*"` allows any origin without credentials; unset falls
// back to local web-client origins.

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;
use url::Url;

const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(std::time::Duration::from_secs(3600));

    match origins.map(str::trim) {
        Some("*") => base.allow_origin(AllowOrigin::any()),
        Some(origins) if !origins.is_empty() => {
            base.allow_origin(parse_origins(origins)).allow_credentials(true)
        }
        _ => base
            .allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(",")))
            .allow_credentials(true),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|origin| match origin_header(origin) {
            Some(value) => Some(value),
            None => {
                warn!(origin, "ignoring malformed CORS origin");
                None
            }
        })
        .collect()
}

// Browsers send `scheme://host[:port]` with no path, so anything else can
// never match.
fn origin_header(origin: &str) -> Option<HeaderValue> {
    let parsed = Url::parse(origin).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    if parsed.path() != "/" || parsed.query().is_some() || origin.ends_with('/') {
        return None;
    }
    HeaderValue::from_str(origin).ok()
}
