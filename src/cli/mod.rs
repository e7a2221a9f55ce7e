mod commands;
mod display;
pub mod http_client;
mod info;
mod project;
mod tenant;
mod token;

pub use commands::{AdminCommands, ProjectCommands, RemoteArgs, TenantCommands, TokenCommands};
pub use info::run_info;
pub use project::{run_project_delete, run_project_list, run_project_status, run_project_upload};
pub use tenant::{run_tenant_add, run_tenant_list};
pub use token::{create_token, run_token_create, run_token_list, run_token_revoke};

use crate::store::SqliteStore;

pub const DB_FILE: &str = "spadock.db";

/// Initialize store from data directory, checking it exists
pub fn init_store(data_dir: &str) -> anyhow::Result<SqliteStore> {
    let data_path: std::path::PathBuf = data_dir.into();
    let db_path = data_path.join(DB_FILE);

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'spadock admin init' first.",
            db_path.display()
        );
    }

    SqliteStore::new(&db_path).map_err(Into::into)
}

pub fn confirm_action(message: &str, yes: bool) -> anyhow::Result<bool> {
    if yes {
        return Ok(true);
    }
    Ok(inquire::Confirm::new(message)
        .with_default(false)
        .prompt()?)
}
