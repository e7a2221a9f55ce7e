use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::auth::RequireTenant;
use crate::error::Error;
use crate::pipeline::{UploadOutcome, UploadRequest};
use crate::render::LoadPlan;
use crate::server::AppState;
use crate::server::dto::{DeleteProjectResponse, UpdateProjectRequest, UploadResponse};
use crate::server::response::{
    ApiError, ApiResponse, ErrorDetail, StoreOptionExt, StoreResultExt,
};
use crate::types::{LifecycleStatus, Project, Tenant};

/// Plan builds retried while the project keeps changing underneath.
const PLAN_BUILD_ATTEMPTS: usize = 3;

pub fn project_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", get(list_projects).post(upload_project))
        .route(
            "/projects/{slug}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/projects/{slug}/activate", post(activate_project))
        .route("/projects/{slug}/deactivate", post(deactivate_project))
        .route("/projects/{slug}/assets", get(list_assets))
        .route("/projects/{slug}/plan", get(get_plan))
        .route("/projects/{slug}/backups", get(list_backups))
}

pub(super) fn load_project(
    state: &AppState,
    tenant: &Tenant,
    slug: &str,
) -> Result<Project, ApiError> {
    state
        .store
        .get_project_by_slug(&tenant.id, slug)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")
}

/// Runs the upload pipeline off the async runtime.
pub(super) async fn run_pipeline(
    state: &AppState,
    request: UploadRequest,
    detail: ErrorDetail,
) -> Result<UploadOutcome, ApiError> {
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || pipeline.process(&request))
        .await
        .map_err(|e| {
            tracing::error!("Upload task failed: {e}");
            ApiError::internal("Upload processing failed")
        })?
        .map_err(|e| ApiError::from_pipeline(&e, detail))
}

pub(super) fn upload_response(outcome: UploadOutcome) -> impl IntoResponse {
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(ApiResponse::success(UploadResponse {
            project: outcome.project,
            assets: outcome.assets,
            report: outcome.report,
            created: outcome.created,
        })),
    )
}

pub(super) fn multipart_error(e: MultipartError) -> ApiError {
    ApiError {
        status: e.status(),
        message: format!("Failed to read upload: {}", e.body_text()),
    }
}

async fn list_projects(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let projects = state
        .store
        .list_projects(&auth.tenant.id)
        .api_err("Failed to list projects")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(projects)))
}

/// POST /projects - multipart fields `file`, `slug`, `display_name`, `description`
async fn upload_project(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let tmp_dir = state.data_dir.join("tmp");
    tokio::fs::create_dir_all(&tmp_dir)
        .await
        .map_err(|_| ApiError::internal("Failed to prepare upload"))?;

    let mut archive: Option<tempfile::NamedTempFile> = None;
    let mut slug: Option<String> = None;
    let mut display_name: Option<String> = None;
    let mut description: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let temp = tempfile::Builder::new()
                    .prefix("upload-")
                    .suffix(".zip")
                    .tempfile_in(&tmp_dir)
                    .map_err(|_| ApiError::internal("Failed to prepare upload"))?;
                let handle = temp
                    .reopen()
                    .map_err(|_| ApiError::internal("Failed to prepare upload"))?;
                let mut file = tokio::fs::File::from_std(handle);

                let limit = state.settings.max_upload_bytes;
                let mut written = 0u64;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    written += chunk.len() as u64;
                    if written > limit {
                        return Err(ApiError::payload_too_large(format!(
                            "Upload exceeds the maximum allowed size ({limit} bytes)"
                        )));
                    }
                    file.write_all(&chunk)
                        .await
                        .map_err(|_| ApiError::internal("Failed to store upload"))?;
                }
                file.flush()
                    .await
                    .map_err(|_| ApiError::internal("Failed to store upload"))?;
                archive = Some(temp);
            }
            Some("slug") => slug = Some(field.text().await.map_err(multipart_error)?),
            Some("display_name") => {
                display_name = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("description") => {
                description = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let archive = archive.ok_or_else(|| ApiError::bad_request("File field is required"))?;
    let slug = slug
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Slug field is required"))?;

    let request = UploadRequest {
        tenant: auth.tenant.clone(),
        slug,
        display_name: display_name.filter(|s| !s.trim().is_empty()),
        description: description.filter(|s| !s.trim().is_empty()),
        archive_path: archive.path().to_path_buf(),
    };

    let outcome = run_pipeline(&state, request, ErrorDetail::for_caller(auth.is_admin())).await;
    drop(archive);

    Ok(upload_response(outcome?))
}

async fn get_project(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let project = load_project(&state, &auth.tenant, &slug)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

async fn update_project(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> impl IntoResponse {
    let mut project = load_project(&state, &auth.tenant, &slug)?;

    if let Some(display_name) = req.display_name {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ApiError::bad_request("Display name cannot be empty"));
        }
        project.display_name = display_name.to_string();
    }
    if let Some(description) = req.description {
        project.description = Some(description).filter(|d| !d.trim().is_empty());
    }
    if let Some(settings) = req.settings {
        if !settings.is_object() {
            return Err(ApiError::bad_request("Settings must be a JSON object"));
        }
        project.settings = settings;
    }
    project.updated_at = Utc::now();

    state
        .store
        .update_project(&project)
        .api_err("Failed to update project")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

async fn delete_project(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let pipeline = Arc::clone(&state.pipeline);
    let tenant = auth.tenant.clone();
    let task_slug = slug.clone();

    let backup = tokio::task::spawn_blocking(move || pipeline.delete(&tenant, &task_slug))
        .await
        .map_err(|_| ApiError::internal("Failed to delete project"))?
        .map_err(|e| match e {
            Error::NotFound => ApiError::not_found("Project not found"),
            other => ApiError::from_pipeline(&other, ErrorDetail::for_caller(auth.is_admin())),
        })?;

    Ok::<_, ApiError>(Json(ApiResponse::success(DeleteProjectResponse {
        slug,
        backup_path: backup.map(|p| p.display().to_string()),
    })))
}

fn set_status(
    state: &AppState,
    auth: &RequireTenant,
    slug: &str,
    status: LifecycleStatus,
) -> Result<Project, ApiError> {
    state
        .pipeline
        .set_status(&auth.tenant, slug, status)
        .map_err(|e| match e {
            Error::NotFound => ApiError::not_found("Project not found"),
            other => ApiError::from_pipeline(&other, ErrorDetail::for_caller(auth.is_admin())),
        })
}

async fn activate_project(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let project = set_status(&state, &auth, &slug, LifecycleStatus::Active)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

async fn deactivate_project(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let project = set_status(&state, &auth, &slug, LifecycleStatus::Inactive)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

/// GET /projects/{slug}/assets - the ordered catalog: critical first, then load order
async fn list_assets(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let project = load_project(&state, &auth.tenant, &slug)?;
    let assets = state
        .store
        .get_ordered_assets(&project.id)
        .api_err("Failed to list assets")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(assets)))
}

/// Cached load plan for `project`, built on `base_url`.
///
/// A plan is cached only when the project's content version is unchanged
/// after its assets were read, so a concurrent re-upload cannot pair the old
/// version with the new catalog.
pub(super) fn cached_plan(
    state: &AppState,
    tenant: &Tenant,
    project: &Project,
    base_url: &str,
) -> Result<Arc<LoadPlan>, ApiError> {
    if let Some(plan) = state
        .plan_cache
        .get(&project.id, &project.content_version, base_url)
    {
        return Ok(plan);
    }

    let mut project = project.clone();
    for _ in 0..PLAN_BUILD_ATTEMPTS {
        let assets = state
            .store
            .get_ordered_assets(&project.id)
            .api_err("Failed to list assets")?;
        let current = state
            .store
            .get_project(&project.id)
            .api_err("Failed to get project")?
            .or_not_found("Project not found")?;

        if current.content_version == project.content_version {
            let plan = state.planner(base_url).plan(&tenant.name, &current, &assets);
            info!(
                tenant = %tenant.name,
                slug = %current.slug,
                version = %current.content_version,
                assets = assets.len(),
                "Load plan built"
            );
            return Ok(state.plan_cache.insert(base_url, plan));
        }
        project = current;
    }

    Err(ApiError::conflict("Project is being replaced, try again shortly"))
}

async fn get_plan(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let project = load_project(&state, &auth.tenant, &slug)?;
    let base_url = state.base_url(&headers);
    let plan = cached_plan(&state, &auth.tenant, &project, &base_url)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(plan.as_ref().clone())))
}

async fn list_backups(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    let backups = state
        .pipeline
        .backups()
        .list(&auth.tenant.name, &slug)
        .api_err("Failed to list backups")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(backups)))
}
