use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    bucket::Bucket,
    config::Config,
    error::{BucketError, Result, StoreError},
    ingest::{self, PayloadFormat},
    observability,
    query::RequestParams,
    response::QueryResponse,
    storage::DocumentStore,
};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Resolves `name` against the configured policy for that bucket.
    fn bucket(&self, name: &str) -> Result<Bucket> {
        Ok(Bucket::new(
            Arc::clone(&self.store),
            name,
            self.config.allow_raw_queries(name),
        )?
        .with_write_attempts(self.config.write_attempts()))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/_status", get(status))
        .route("/metrics", get(observability::metrics_handler))
        .route("/{bucket}", get(query_bucket).post(write_bucket))
        .with_state(state)
        .layer(middleware::from_fn(observability::track_http_metrics))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: Config) -> Result<()> {
    if let Err(err) = observability::init() {
        warn!("metrics recorder unavailable: {err}");
    }

    let addr: SocketAddr = config.listen_addr().parse().map_err(|err| {
        BucketError::Config(format!(
            "invalid bind address {}: {err}",
            config.listen_addr()
        ))
    })?;
    let store = config.open_store()?;
    let app = build_router(AppState::new(config, store));

    let listener = TcpListener::bind(addr).await?;
    info!("Starting bucketdb server on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("bucketdb server stopped");
    Ok(())
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    status: &'a str,
}

async fn status() -> impl IntoResponse {
    Json(StatusResponse { status: "ok" })
}

async fn query_bucket(
    State(state): State<AppState>,
    Path(name): Path<String>,
    pairs: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<QueryResponse>> {
    let outcome = match pairs {
        Ok(Query(pairs)) => run_query(&state, &name, pairs).await,
        Err(rejection) => Err(BucketError::Parse(rejection.body_text())),
    };
    reject_on_client_error("query", outcome).map(Json)
}

async fn run_query(
    state: &AppState,
    name: &str,
    pairs: Vec<(String, String)>,
) -> Result<QueryResponse> {
    let bucket = state.bucket(name)?;
    let query = bucket.parse_query(&RequestParams::new(pairs))?;
    let response = tokio::task::spawn_blocking(move || bucket.query_response(&query))
        .await
        .map_err(|err| StoreError::Fatal(format!("failed to query bucket: {err}")))??;
    Ok(response)
}

async fn write_bucket(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StatusResponse<'static>>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let format = PayloadFormat::from_content_type(content_type);
    reject_on_client_error("write", run_write(&state, &name, format, &body).await)?;
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn run_write(
    state: &AppState,
    name: &str,
    format: PayloadFormat,
    body: &[u8],
) -> Result<usize> {
    let bucket = state.bucket(name)?;
    let records = ingest::parse_payload(format, body)?;
    let stored = tokio::task::spawn_blocking(move || bucket.store(records))
        .await
        .map_err(|err| StoreError::Fatal(format!("failed to store records: {err}")))??;
    Ok(stored)
}

fn reject_on_client_error<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        if err.is_client_error() {
            observability::record_rejected(operation);
        } else {
            warn!(operation, error = %err, "request failed");
        }
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
