// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own sizing variables in db/pool.rs.

use std::net::SocketAddr;

use crate::store::AssigneeSeeding;

pub const DEV_JWT_SECRET: &str = "taskman_local_development_jwt_secret_must_be_32_chars";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret used to verify access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `taskman_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Whether a resource creator is automatically among its assignees.
    pub assignee_seeding: AssigneeSeeding,
    /// Re-run the resource-level authorization check on client-pushed echoes.
    pub verify_client_echoes: bool,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TASKMAN_RELAY_HOST` | `0.0.0.0` |
    /// | `TASKMAN_RELAY_PORT` | `8080` |
    /// | `TASKMAN_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `TASKMAN_RELAY_DATABASE_URL` | *(none: in-memory store)* |
    /// | `TASKMAN_RELAY_CORS_ORIGINS` | *(none: cors.rs uses dev defaults)* |
    /// | `TASKMAN_RELAY_LOG_FILTER` | `info` |
    /// | `TASKMAN_RELAY_LOG_FORMAT` | `text` |
    /// | `TASKMAN_RELAY_SEED_CREATOR_ASSIGNEE` | `true` |
    /// | `TASKMAN_RELAY_VERIFY_CLIENT_ECHOES` | `false` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("TASKMAN_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("TASKMAN_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("TASKMAN_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("TASKMAN_RELAY_DATABASE_URL").ok().filter(|url| !url.is_empty());
        let cors_origins = env("TASKMAN_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("TASKMAN_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("TASKMAN_RELAY_LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let assignee_seeding = if parse_bool(env("TASKMAN_RELAY_SEED_CREATOR_ASSIGNEE").ok(), true)
        {
            AssigneeSeeding::IncludeCreator
        } else {
            AssigneeSeeding::ExplicitOnly
        };
        let verify_client_echoes =
            parse_bool(env("TASKMAN_RELAY_VERIFY_CLIENT_ECHOES").ok(), false);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            assignee_seeding,
            verify_client_echoes,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
