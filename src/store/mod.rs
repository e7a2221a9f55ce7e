mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface: the project registry, the asset
/// catalog, and the tenants, tokens and upload sessions around them.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Tenant operations
    fn create_tenant(&self, tenant: &Tenant) -> Result<()>;
    fn get_tenant(&self, id: &str) -> Result<Option<Tenant>>;
    fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>>;
    fn list_tenants(&self) -> Result<Vec<Tenant>>;
    fn delete_tenant(&self, id: &str) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>>;
    fn list_tenant_tokens(&self, tenant_id: &str) -> Result<Vec<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;

    // Project registry
    fn get_project(&self, id: &str) -> Result<Option<Project>>;
    fn get_project_by_slug(&self, tenant_id: &str, slug: &str) -> Result<Option<Project>>;
    fn list_projects(&self, tenant_id: &str) -> Result<Vec<Project>>;
    /// Updates metadata (display name, description, status, settings).
    fn update_project(&self, project: &Project) -> Result<()>;
    fn delete_project(&self, id: &str) -> Result<bool>;
    fn count_projects(&self, tenant_id: &str) -> Result<i64>;

    /// Inserts or updates a project and replaces its asset set in one
    /// transaction.
    ///
    /// With `expected_version == None` the project must be new; an existing
    /// `(tenant, slug)` fails with `Conflict`. Otherwise the stored row must
    /// still carry `expected_version`, so two re-uploads racing on the same
    /// slug cannot both win. Returns the stored asset records.
    fn commit_project(
        &self,
        project: &Project,
        assets: &[AssetRecord],
        expected_version: Option<&str>,
    ) -> Result<Vec<AssetRecord>>;

    // Asset catalog
    /// Deletes every record of the project and inserts `records`, atomically.
    fn replace_assets(&self, project_id: &str, records: &[AssetRecord]) -> Result<Vec<AssetRecord>>;
    /// Records ordered by criticality, then load order.
    fn get_ordered_assets(&self, project_id: &str) -> Result<Vec<AssetRecord>>;

    // Upload sessions
    fn create_upload_session(&self, session: &UploadSession) -> Result<()>;
    fn get_upload_session(&self, id: &str) -> Result<Option<UploadSession>>;
    fn delete_upload_session(&self, id: &str) -> Result<bool>;
    fn list_upload_sessions_before(&self, before: &DateTime<Utc>) -> Result<Vec<UploadSession>>;

    // Admin token check
    fn has_admin_token(&self) -> Result<bool>;

    fn close(&self) -> Result<()>;
}
