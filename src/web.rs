use crate::{
    app::AppService,
    catalog::AssetType,
    indexer::QueueDump,
    semantic::{ErrorKind, IndexStats, SearchError, SearchResult, SimilarKeyword},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<AppService>,
}

pub fn router(app: Arc<AppService>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/keywords/similar", post(similar_keywords))
        .route("/api/index", post(index))
        .route("/api/index/status", get(index_status))
        .route("/api/stats", get(stats))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: Arc<AppService>) -> anyhow::Result<()> {
    let listen_addr = app.config().listen_addr.clone();
    let signal = shutdown_signal(app.clone());

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(signal)
        .await?;
    Ok(())
}

async fn shutdown_signal(app: Arc<AppService>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("waiting for index queue to stop");
    if let Err(err) = tokio::task::spawn_blocking(move || app.shutdown()).await {
        log::error!("index queue shutdown failed: {err}");
    }
}

pub fn start_daemon(app: AppService) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(Arc::new(app)))
}

// Make our own error that wraps `anyhow::Error`.
#[derive(Debug)]
struct HttpError(anyhow::Error);

impl HttpError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<SearchError>().map(SearchError::kind) {
            Some(ErrorKind::InvalidQuery) => StatusCode::BAD_REQUEST,
            Some(ErrorKind::EmbeddingProviderFailure) => StatusCode::BAD_GATEWAY,
            Some(ErrorKind::Cancelled) => StatusCode::GATEWAY_TIMEOUT,
            Some(ErrorKind::DimensionMismatch) | Some(ErrorKind::StorageFailure) | None => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Tell axum how to convert `HttpError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{:#}", self.0);
        }

        let kind = self.0.downcast_ref::<SearchError>().map(SearchError::kind);
        (
            status,
            Json(json!({"error": format!("{:#}", self.0), "kind": kind})),
        )
            .into_response()
    }
}

// This enables using `?` on functions that return `Result<_, anyhow::Error>` to turn them into
// `Result<_, HttpError>`. That way you don't need to do that manually.
impl<E> From<E> for HttpError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_similarity: Option<f32>,
    #[serde(rename = "type")]
    pub asset_type: Option<AssetType>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let ctx = app.search_service().context();

    // dropping this future (client went away) cancels the search
    let guard = ctx.token().clone().drop_guard();
    let results = tokio::task::spawn_blocking(move || {
        app.search_with_context(
            &payload.query,
            payload.top_k,
            payload.min_similarity,
            payload.asset_type,
            &ctx,
        )
    })
    .await??;
    guard.disarm();

    Ok(Json(results))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimilarKeywordsRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_similarity: Option<f32>,
}

async fn similar_keywords(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SimilarKeywordsRequest>,
) -> Result<Json<Vec<SimilarKeyword>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let keywords = tokio::task::spawn_blocking(move || {
        app.similar_keywords(&payload.query, payload.top_k, payload.min_similarity)
    })
    .await??;

    Ok(Json(keywords))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexRequest {
    /// Block until indexing is done.
    ///
    /// *Indexing runs in background by default*
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed: Option<usize>,
}

async fn index(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<IndexRequest>>,
) -> Result<Json<IndexResponse>, HttpError> {
    let Json(payload) = payload.unwrap_or_default();

    let ticket = state.app.submit_index_all()?;
    let task_id = ticket.id.clone();

    if !payload.wait {
        return Ok(Json(IndexResponse {
            task_id,
            indexed: None,
        }));
    }

    let indexed = tokio::task::spawn_blocking(move || ticket.wait()).await??;
    Ok(Json(IndexResponse {
        task_id,
        indexed: Some(indexed),
    }))
}

async fn index_status(State(state): State<Arc<SharedState>>) -> Json<QueueDump> {
    Json(state.app.index_queue())
}

async fn stats(State(state): State<Arc<SharedState>>) -> Result<Json<IndexStats>, HttpError> {
    let app = state.app.clone();
    let stats = tokio::task::spawn_blocking(move || app.stats()).await??;
    Ok(Json(stats))
}
