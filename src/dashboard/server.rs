use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::analytics;
use super::dataset::Dataset;
use super::templates::{render_dashboard, render_empty};
use super::view::{build_view, DashboardQuery};
use crate::observability::metrics;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_COMMENT_LIMIT: usize = 100;

/// The dataset currently on display; uploads swap it out
#[derive(Clone, Default)]
pub struct AppState {
    dataset: Arc<RwLock<Option<Arc<Dataset>>>>,
}

impl AppState {
    pub fn new(dataset: Option<Dataset>) -> Self {
        Self { dataset: Arc::new(RwLock::new(dataset.map(Arc::new))) }
    }

    pub async fn current(&self) -> Option<Arc<Dataset>> {
        self.dataset.read().await.clone()
    }

    pub async fn replace(&self, dataset: Dataset) {
        *self.dataset.write().await = Some(Arc::new(dataset));
    }
}

fn render_error(e: askama::Error) -> Response {
    warn!("Template rendering failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Template rendering failed").into_response()
}

fn html_page(rendered: askama::Result<String>, status: StatusCode) -> Response {
    match rendered {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => render_error(e),
    }
}

fn no_dataset() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "no dataset loaded" }))).into_response()
}

async fn index(State(state): State<AppState>, Query(query): Query<DashboardQuery>) -> Response {
    metrics::dashboard::request("index");
    match state.current().await {
        Some(dataset) => {
            let view = build_view(&dataset, &query);
            html_page(render_dashboard(&view, None, true), StatusCode::OK)
        }
        None => html_page(render_empty(None), StatusCode::OK),
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Dataset, String> {
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field.bytes().await.map_err(|e| e.to_string())?;
        return Dataset::from_bytes(&bytes, &name).map_err(|e| e.to_string());
    }
    Err("Upload has no 'file' field".to_string())
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Response {
    metrics::dashboard::request("upload");
    match read_upload(multipart).await {
        Ok(dataset) => {
            info!("Dataset replaced by upload {} ({} rows)", dataset.name, dataset.len());
            metrics::dashboard::upload();
            state.replace(dataset).await;
            Redirect::to("/").into_response()
        }
        Err(message) => {
            warn!("Rejected upload: {}", message);
            let message = Some(format!("Upload rejected: {}", message));
            match state.current().await {
                Some(dataset) => {
                    let view = build_view(&dataset, &DashboardQuery::default());
                    html_page(render_dashboard(&view, message, true), StatusCode::BAD_REQUEST)
                }
                None => html_page(render_empty(message), StatusCode::BAD_REQUEST),
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeQuery {
    episode: Option<String>,
}

async fn api_overview(State(state): State<AppState>, Query(query): Query<EpisodeQuery>) -> Response {
    metrics::dashboard::request("api_overview");
    let Some(dataset) = state.current().await else {
        return no_dataset();
    };
    let rows = analytics::filter_episode(&dataset, query.episode.as_deref());
    Json(json!({
        "dataset": dataset.name,
        "episode": query.episode.as_deref().unwrap_or(analytics::ALL_EPISODES),
        "overview": analytics::overview(&rows, dataset.has_sentiment()),
        "distribution": analytics::sentiment_distribution(&rows),
    }))
    .into_response()
}

async fn api_keywords(State(state): State<AppState>, Query(query): Query<DashboardQuery>) -> Response {
    metrics::dashboard::request("api_keywords");
    let Some(dataset) = state.current().await else {
        return no_dataset();
    };
    let rows = analytics::filter_episode(&dataset, query.episode());
    let (top_n, min_len) = (query.top_n(), query.min_len());
    Json(json!({
        "top_n": top_n,
        "min_len": min_len,
        "groups": analytics::keyword_groups(&rows, dataset.has_sentiment(), top_n, min_len),
        "drilldown_options": analytics::drilldown_options(&rows, min_len),
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct CommentsQuery {
    episode: Option<String>,
    sentiment: Option<String>,
    q: Option<String>,
    keyword: Option<String>,
    limit: Option<usize>,
}

async fn api_comments(State(state): State<AppState>, Query(query): Query<CommentsQuery>) -> Response {
    metrics::dashboard::request("api_comments");
    let Some(dataset) = state.current().await else {
        return no_dataset();
    };
    let rows = analytics::filter_episode(&dataset, query.episode.as_deref());
    let rows = analytics::drilldown(&rows, query.keyword.as_deref());
    let rows = analytics::explore(&rows, dataset.has_sentiment(), query.sentiment.as_deref(), query.q.as_deref());
    let limit = query.limit.unwrap_or(DEFAULT_COMMENT_LIMIT);
    let shown: Vec<_> = rows.iter().take(limit).copied().collect();
    Json(json!({
        "count": rows.len(),
        "table": analytics::comment_table(&dataset, &shown),
    }))
    .into_response()
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let rows = state.current().await.map(|d| d.len());
    Json(json!({
        "status": "healthy",
        "service": "audience-pulse-dashboard",
        "version": env!("CARGO_PKG_VERSION"),
        "rows": rows,
    }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::render())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/api/overview", get(api_overview))
        .route("/api/keywords", get(api_keywords))
        .route("/api/comments", get(api_comments))
        .route("/healthz", get(healthz))
        .route("/metrics", get(prometheus_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down dashboard");
}

/// Serve the dashboard until Ctrl-C
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);
    info!("Dashboard running on http://{}", addr);
    info!("Health check: http://{}/healthz", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
