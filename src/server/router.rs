use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::projects::project_router;
use super::public::public_router;
use super::uploads::upload_router;
use crate::config::{ServerConfig, Settings};
use crate::events::EventBus;
use crate::pipeline::{ChunkStore, UploadPipeline};
use crate::render::{LoadPlanner, PlanCache};
use crate::store::Store;

/// Headroom over the archive limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub data_dir: PathBuf,
    /// Public base URL for external access. Used for asset URLs.
    pub public_base_url: Option<String>,
    pub settings: Arc<Settings>,
    pub pipeline: Arc<UploadPipeline>,
    pub chunks: ChunkStore,
    pub events: EventBus,
    pub plan_cache: Arc<PlanCache>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &ServerConfig, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let events = EventBus::default();
        let pipeline = UploadPipeline::new(
            Arc::clone(&store),
            Arc::clone(&settings),
            &config.data_dir,
            events.clone(),
        );
        Self {
            store,
            data_dir: config.data_dir.clone(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            settings,
            pipeline: Arc::new(pipeline),
            chunks: ChunkStore::new(&config.data_dir),
            events,
            plan_cache: Arc::new(PlanCache::new()),
        }
    }

    /// Origin that asset URLs are built on: the configured public URL, or
    /// the scheme and host the request came in on.
    #[must_use]
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.public_base_url {
            return url.clone();
        }
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(axum::http::header::HOST))
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|h| h.to_str().ok())
            .filter(|p| matches!(*p, "http" | "https"))
            .unwrap_or("http");
        format!("{scheme}://{host}")
    }

    #[must_use]
    pub fn planner(&self, base_url: &str) -> LoadPlanner {
        LoadPlanner::new(base_url, &self.settings)
    }

    pub(crate) fn upload_body_limit(&self) -> usize {
        usize::try_from(self.settings.max_upload_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.upload_body_limit());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/admin", admin_router())
        .nest("/api/v1", project_router().merge(upload_router()).layer(body_limit))
        .merge(public_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
