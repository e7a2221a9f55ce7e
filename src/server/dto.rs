use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::ExtractionReport;
use crate::types::{AssetRecord, Project, Token, UploadSession};

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTokenRequest {
    /// Tenant the token manages. Omit together with `is_admin` for an admin token.
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            id: token.id,
            is_admin: token.is_admin,
            tenant_id: token.tenant_id,
            created_at: token.created_at,
            expires_at: token.expires_at,
            last_used_at: token.last_used_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub metadata: TokenResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub project: Project,
    pub assets: Vec<AssetRecord>,
    pub report: ExtractionReport,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteProjectResponse {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUploadSessionRequest {
    pub slug: String,
    pub filename: String,
    pub total_chunks: u32,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadSessionResponse {
    #[serde(flatten)]
    pub session: UploadSession,
    pub received_chunks: Vec<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssetQueryParams {
    /// Asset version the URL was built with; enables long-lived caching.
    #[serde(default)]
    pub v: Option<String>,
}
