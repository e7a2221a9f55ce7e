use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::projects::cached_plan;
use crate::auth::OptionalAuth;
use crate::pipeline::rules::{check_entry_path, extension_of, is_static_asset};
use crate::render::{RenderContext, TagOptions, TagRenderer};
use crate::server::AppState;
use crate::server::dto::AssetQueryParams;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::types::Project;

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";
const REVALIDATE_CACHE: &str = "public, max-age=300, must-revalidate";

pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/render/{tenant}/{slug}", get(render_project))
        .route("/assets/{tenant}/{slug}/{*path}", get(serve_asset))
}

/// GET /render/{tenant}/{slug} - tag options as query parameters; `format=json`
/// returns the parts separately.
async fn render_project(
    auth: OptionalAuth,
    State(state): State<Arc<AppState>>,
    Path((tenant_name, slug)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let as_json = params
        .iter()
        .any(|(k, v)| k == "format" && v.eq_ignore_ascii_case("json"));
    let pairs = params
        .into_iter()
        .filter(|(k, _)| k != "format" && k != "slug")
        .chain(std::iter::once(("slug".to_string(), slug.clone())));
    let options = TagOptions::from_query(pairs).map_err(ApiError::bad_request)?;

    let tenant = state
        .store
        .get_tenant_by_name(&tenant_name)
        .api_err("Failed to get tenant")?;
    let privileged = tenant
        .as_ref()
        .is_some_and(|t| auth.is_privileged_for(&t.id));

    let project = match &tenant {
        Some(t) => state
            .store
            .get_project_by_slug(&t.id, &slug)
            .api_err("Failed to get project")?,
        None => None,
    };

    let plan = match (&tenant, &project) {
        (Some(t), Some(p)) if p.is_active() => {
            let base_url = state.base_url(&headers);
            Some(cached_plan(&state, t, p, &base_url)?).filter(|plan| !plan.is_empty())
        }
        _ => None,
    };
    let project_dir = project
        .as_ref()
        .map(|p| state.pipeline.layout().resolve(&p.storage_path));

    let output = TagRenderer::render(&RenderContext {
        options: &options,
        project: project.as_ref(),
        plan: plan.as_deref(),
        project_dir: project_dir.as_deref(),
        privileged,
    });

    let mut response = if as_json {
        Json(ApiResponse::success(output)).into_response()
    } else {
        Html(output.to_fragment()).into_response()
    };
    // Rendered output depends on the viewer and carries a fresh container id.
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

/// GET /assets/{tenant}/{slug}/{*path} - static files of active projects only
async fn serve_asset(
    State(state): State<Arc<AppState>>,
    Path((tenant_name, slug, path)): Path<(String, String, String)>,
    Query(params): Query<AssetQueryParams>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::not_found("Asset not found");

    let segments =
        check_entry_path(&path, state.settings.max_path_depth).map_err(|_| not_found())?;
    if segments.iter().any(|s| s.starts_with('.')) || !is_static_asset(&path) {
        return Err(not_found());
    }

    let tenant = state
        .store
        .get_tenant_by_name(&tenant_name)
        .api_err("Failed to get tenant")?
        .ok_or_else(not_found)?;
    let project = state
        .store
        .get_project_by_slug(&tenant.id, &slug)
        .api_err("Failed to get project")?
        .filter(|p| p.is_active())
        .ok_or_else(not_found)?;

    let root = state.pipeline.layout().resolve(&project.storage_path);
    let full_path = segments.iter().fold(root.clone(), |p, s| p.join(s));

    let (Ok(root), Ok(full_path)) = (
        tokio::fs::canonicalize(&root).await,
        tokio::fs::canonicalize(&full_path).await,
    ) else {
        return Err(not_found());
    };
    if !full_path.starts_with(&root) {
        warn!(tenant = %tenant.name, slug, path, "Asset path escapes project directory");
        return Err(not_found());
    }

    let file = tokio::fs::File::open(&full_path).await.map_err(|_| not_found())?;
    let metadata = file.metadata().await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    let versioned = match params.v.as_deref() {
        Some(v) => version_matches(&state, &project, &segments.join("/"), v)?,
        None => false,
    };
    let cache_control = if versioned {
        IMMUTABLE_CACHE
    } else {
        REVALIDATE_CACHE
    };
    let content_type = extension_of(&path)
        .map(|ext| content_type_for(&ext))
        .unwrap_or("application/octet-stream");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CACHE_CONTROL, cache_control)
        .header(header::ETAG, format!("\"{}\"", project.content_version))
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|_| ApiError::internal("Failed to build response"))
}

/// True when `v` names the bytes being served: the project's content version,
/// or the cataloged content hash of this file.
fn version_matches(
    state: &AppState,
    project: &Project,
    relative_path: &str,
    v: &str,
) -> Result<bool, ApiError> {
    if v == project.content_version {
        return Ok(true);
    }
    let assets = state
        .store
        .get_ordered_assets(&project.id)
        .api_err("Failed to list assets")?;
    Ok(assets
        .iter()
        .any(|a| a.relative_path == relative_path && a.content_hash == v))
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "js" | "mjs" | "cjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "wasm" => "application/wasm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
