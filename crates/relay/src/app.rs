// Router assembly and server bootstrap, shared by the binary and the
// integration tests.

use std::{future::Future, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    api::{self, ApiState},
    auth::jwt::AccessTokenVerifier,
    config::RelayConfig,
    cors::cors_layer,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope},
    hub::{BoardHub, SynchronizationHub},
    metrics::RelayMetrics,
    store::BoardStore,
    validation::MAX_REST_BODY_BYTES,
    ws,
};

/// PostgreSQL when a database url is configured, otherwise the in-memory store.
pub async fn connect_store(config: &RelayConfig) -> anyhow::Result<BoardStore> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("TASKMAN_RELAY_DATABASE_URL is not set, board state lives in memory only");
        return Ok(BoardStore::memory());
    };

    let pool = create_pg_pool(database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize board PostgreSQL pool")?;
    check_pool_health(&pool).await?;
    run_migrations(&pool).await?;

    Ok(BoardStore::Postgres(pool))
}

pub fn build_router(
    config: &RelayConfig,
    store: BoardStore,
    metrics: Arc<RelayMetrics>,
) -> anyhow::Result<Router> {
    let verifier =
        Arc::new(AccessTokenVerifier::new(&config.jwt_secret).context("invalid relay JWT secret")?);
    let hub = Arc::new(SynchronizationHub::new(store.clone(), config.verify_client_echoes));
    let api_state = ApiState::new(store, Arc::clone(&hub), config.assignee_seeding);

    let router = Router::new()
        .route("/healthz", get(healthz))
        .with_state(Arc::clone(&hub))
        .merge(Router::new().route("/metrics", get(render_metrics)).with_state(Arc::clone(&metrics)))
        .merge(ws::router(Arc::clone(&verifier), Arc::clone(&hub)))
        .merge(api::router(api_state, verifier));

    Ok(apply_middleware(router, metrics, config.cors_origins.as_deref()))
}

fn apply_middleware(router: Router, metrics: Arc<RelayMetrics>, cors_origins: Option<&str>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(middleware::from_fn_with_state(metrics, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

pub async fn serve<S>(listener: TcpListener, router: Router, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited unexpectedly")
}

async fn healthz(State(hub): State<Arc<BoardHub>>) -> Json<Value> {
    Json(json!({ "status": "ok", "tenants": hub.registry().tenant_count().await }))
}

async fn render_metrics(State(metrics): State<Arc<RelayMetrics>>) -> Response {
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], metrics.render_prometheus()).into_response()
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(
    State(metrics): State<Arc<RelayMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    metrics.record_http_request(method.as_str(), &path, status, latency_ms);
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        latency_ms,
        "request completed"
    );

    response
}
