use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{TokenValidationError, extract_token_from_header, validate_token};
use crate::server::AppState;
use crate::types::{DEFAULT_TENANT, Tenant, Token};

/// Header an admin token uses to pick the tenant it acts on.
pub const TENANT_HEADER: &str = "x-spadock-tenant";

/// Extractor that requires admin authentication
pub struct RequireAdmin(pub Token);

/// Extractor that requires a token allowed to manage one tenant's projects.
///
/// Tenant tokens act on their own tenant. Admin tokens act on the tenant
/// named by [`TENANT_HEADER`], or the default tenant.
pub struct RequireTenant {
    pub token: Token,
    pub tenant: Tenant,
}

impl RequireTenant {
    /// Admins see full violation detail; tenant uploaders see the first one.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.token.is_admin
    }
}

/// Authentication that may be absent. Invalid credentials count as anonymous.
pub struct OptionalAuth(pub Option<Token>);

impl OptionalAuth {
    /// Whether the caller may see diagnostics for projects of `tenant_id`.
    #[must_use]
    pub fn is_privileged_for(&self, tenant_id: &str) -> bool {
        self.0
            .as_ref()
            .is_some_and(|t| t.is_admin || t.tenant_id.as_deref() == Some(tenant_id))
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    NotAdmin,
    UnknownTenant,
    WrongTenant,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::UnknownTenant => (StatusCode::NOT_FOUND, "Tenant not found"),
            AuthError::WrongTenant => (
                StatusCode::FORBIDDEN,
                "Token is not valid for the requested tenant",
            ),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"spadock\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_and_validate_token(parts, state)?.ok_or(AuthError::MissingAuth)?;

        if !token.is_admin {
            return Err(AuthError::NotAdmin);
        }

        Ok(RequireAdmin(token))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireTenant {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_and_validate_token(parts, state)?.ok_or(AuthError::MissingAuth)?;

        let requested = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let tenant = if token.is_admin {
            state
                .store
                .get_tenant_by_name(requested.unwrap_or(DEFAULT_TENANT))
                .map_err(|_| AuthError::InternalError)?
                .ok_or(AuthError::UnknownTenant)?
        } else {
            let tenant_id = token.tenant_id.as_deref().ok_or(AuthError::WrongTenant)?;
            let tenant = state
                .store
                .get_tenant(tenant_id)
                .map_err(|_| AuthError::InternalError)?
                .ok_or(AuthError::UnknownTenant)?;
            if requested.is_some_and(|name| name != tenant.name) {
                return Err(AuthError::WrongTenant);
            }
            tenant
        };

        Ok(RequireTenant { token, tenant })
    }
}

impl FromRequestParts<Arc<AppState>> for OptionalAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match extract_and_validate_token(parts, state) {
            Ok(token) => Ok(OptionalAuth(token)),
            Err(AuthError::InternalError) => Err(AuthError::InternalError),
            Err(e) => {
                tracing::debug!("Ignoring unusable credentials: {e:?}");
                Ok(OptionalAuth(None))
            }
        }
    }
}

fn extract_and_validate_token(
    parts: &Parts,
    state: &Arc<AppState>,
) -> Result<Option<Token>, AuthError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(raw_token) = extract_token_from_header(auth_header).map_err(map_validation)? else {
        return Ok(None);
    };

    validate_token(state.store.as_ref(), &raw_token)
        .map(Some)
        .map_err(map_validation)
}

fn map_validation(e: TokenValidationError) -> AuthError {
    match e {
        TokenValidationError::InvalidScheme => AuthError::InvalidScheme,
        TokenValidationError::InvalidToken => AuthError::InvalidToken,
        TokenValidationError::TokenExpired => AuthError::TokenExpired,
        TokenValidationError::InternalError => AuthError::InternalError,
    }
}
