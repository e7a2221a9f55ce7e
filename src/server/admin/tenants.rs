use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireAdmin;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::CreateTenantRequest;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::{DEFAULT_TENANT, Tenant};
use crate::validation::validate_tenant_name;

pub async fn create_tenant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> impl IntoResponse {
    validate_tenant_name(&req.name).map_err(ApiError::bad_request)?;

    let tenant = Tenant {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        created_at: Utc::now(),
    };

    match state.store.create_tenant(&tenant) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => return Err(ApiError::conflict("Tenant already exists")),
        Err(e) => {
            tracing::error!("Failed to create tenant: {e}");
            return Err(ApiError::internal("Failed to create tenant"));
        }
    }
    tracing::info!(tenant = %tenant.name, "Tenant created");

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(tenant))))
}

pub async fn list_tenants(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let tenants = state
        .store
        .list_tenants()
        .api_err("Failed to list tenants")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(tenants)))
}

pub async fn delete_tenant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if name == DEFAULT_TENANT {
        return Err(ApiError::bad_request("Cannot delete the default tenant"));
    }

    let tenant = state
        .store
        .get_tenant_by_name(&name)
        .api_err("Failed to get tenant")?
        .or_not_found("Tenant not found")?;

    let projects = state
        .store
        .count_projects(&tenant.id)
        .api_err("Failed to count projects")?;
    if projects > 0 {
        return Err(ApiError::conflict(format!(
            "Tenant still has {projects} project(s)"
        )));
    }

    state
        .store
        .delete_tenant(&tenant.id)
        .api_err("Failed to delete tenant")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
