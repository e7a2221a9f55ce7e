use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use spadock::auth::TokenGenerator;
use spadock::cli::{
    AdminCommands, ProjectCommands, TenantCommands, TokenCommands, create_token, run_info,
    run_project_delete, run_project_list, run_project_status, run_project_upload, run_tenant_add,
    run_tenant_list, run_token_create, run_token_list, run_token_revoke,
};
use spadock::config::{ServerConfig, Settings};
use spadock::server::{AppState, create_router};
use spadock::store::{SqliteStore, Store};
use spadock::types::{DEFAULT_TENANT, Tenant};

/// Chunk sessions and staging leftovers older than this are removed on start.
const STALE_UPLOAD_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[cfg(unix)]
fn set_restrictive_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "spadock")]
#[command(about = "Host prebuilt single-page apps and embed them in pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Manage projects on a running server
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "8080")]
        port: u16,

        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Public base URL for external access (e.g., "https://apps.example.com").
        /// Used for asset URLs in load plans. If not set, URLs are derived from request headers.
        #[arg(long)]
        public_base_url: Option<String>,
    },
}

fn run_init(data_dir: String, non_interactive: bool) -> anyhow::Result<()> {
    let data_path: std::path::PathBuf = data_dir.into();
    fs::create_dir_all(&data_path)?;

    let config = ServerConfig {
        data_dir: data_path.clone(),
        ..ServerConfig::default()
    };
    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let token_file = data_path.join(".admin_token");

    if store.has_admin_token()? {
        bail!(
            "Server already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    if store.get_tenant_by_name(DEFAULT_TENANT)?.is_none() {
        store.create_tenant(&Tenant {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_TENANT.to_string(),
            created_at: Utc::now(),
        })?;
    }

    let generator = TokenGenerator::new();
    let (token, raw_token) = create_token(&generator, None, None)?;

    store.create_token(&token)?;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    let settings_path = config.settings_path();
    if !settings_path.exists() {
        fs::write(&settings_path, toml::to_string_pretty(&Settings::default())?)?;
    }

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("Settings written to:   {}", settings_path.display());
    println!("========================================");
    println!();

    if !non_interactive {
        create_default_tenant_token_prompt(&store, &generator)?;
    }

    Ok(())
}

fn create_default_tenant_token_prompt(
    store: &SqliteStore,
    generator: &TokenGenerator,
) -> anyhow::Result<()> {
    let create = inquire::Confirm::new(&format!(
        "Would you like a token for the '{DEFAULT_TENANT}' tenant?"
    ))
    .with_default(false)
    .prompt()?;

    if !create {
        return Ok(());
    }

    let tenant = store
        .get_tenant_by_name(DEFAULT_TENANT)?
        .ok_or_else(|| anyhow::anyhow!("Default tenant is missing"))?;
    let (tenant_token, raw_token) = create_token(generator, Some(tenant.id), None)?;
    store.create_token(&tenant_token)?;

    println!();
    println!("========================================");
    println!("Token for tenant '{DEFAULT_TENANT}':");
    println!();
    println!("  {raw_token}");
    println!();
    println!("========================================");
    println!();

    Ok(())
}

/// Removes what interrupted uploads left behind before requests are accepted.
async fn sweep_stale_uploads(state: &AppState) -> anyhow::Result<()> {
    let pipeline = Arc::clone(&state.pipeline);
    let work_dirs = tokio::task::spawn_blocking(move || pipeline.sweep_stale()).await??;
    let chunk_dirs = state.chunks.sweep_stale(STALE_UPLOAD_AGE).await?;

    let cutoff = Utc::now() - chrono::Duration::from_std(STALE_UPLOAD_AGE)?;
    let sessions = state.store.list_upload_sessions_before(&cutoff)?;
    for session in &sessions {
        if let Err(e) = state.chunks.cancel(&session.id).await {
            warn!(session = %session.id, "Failed to remove upload chunks: {e}");
        }
        state.store.delete_upload_session(&session.id)?;
    }

    if work_dirs + chunk_dirs + sessions.len() > 0 {
        info!(
            work_dirs,
            chunk_dirs,
            sessions = sessions.len(),
            "Swept stale upload state"
        );
    }
    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let token_file = config.data_dir.join(".admin_token");
    if !token_file.exists() {
        bail!(
            "Server not initialized. Run 'spadock admin init' first to create the database and admin token."
        );
    }

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    if !store.has_admin_token()? {
        bail!(
            "Server not initialized. Run 'spadock admin init' first to create the database and admin token."
        );
    }

    info!("Admin token available at {}", token_file.display());

    let settings = Settings::load(&config.settings_path())?;
    let state = Arc::new(AppState::new(Arc::new(store), &config, settings));

    sweep_stale_uploads(&state).await?;
    state.plan_cache.spawn_invalidator(&state.events);

    let app = create_router(Arc::clone(&state));
    let addr = config.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn run_admin(command: AdminCommands) -> anyhow::Result<()> {
    match command {
        AdminCommands::Init {
            data_dir,
            non_interactive,
        } => run_init(data_dir, non_interactive),
        AdminCommands::Info { data_dir, json } => run_info(data_dir, json),
        AdminCommands::Tenant { command } => match command {
            TenantCommands::Add {
                data_dir,
                name,
                create_token,
            } => run_tenant_add(data_dir, name, create_token),
            TenantCommands::List { data_dir, json } => run_tenant_list(data_dir, json),
        },
        AdminCommands::Token { command } => match command {
            TokenCommands::Create {
                data_dir,
                tenant,
                expires_days,
            } => run_token_create(data_dir, tenant, expires_days),
            TokenCommands::List { data_dir, json } => run_token_list(data_dir, json),
            TokenCommands::Revoke {
                data_dir,
                token_id,
                yes,
            } => run_token_revoke(data_dir, token_id, yes),
        },
    }
}

fn run_project(command: ProjectCommands) -> anyhow::Result<()> {
    match command {
        ProjectCommands::Upload {
            remote,
            archive,
            slug,
            display_name,
            description,
            chunk_mib,
            json,
        } => run_project_upload(
            &remote,
            &archive,
            &slug,
            display_name.as_deref(),
            description.as_deref(),
            chunk_mib,
            json,
        ),
        ProjectCommands::List { remote, json } => run_project_list(&remote, json),
        ProjectCommands::Status {
            remote,
            slug,
            inactive,
        } => run_project_status(&remote, &slug, inactive),
        ProjectCommands::Delete { remote, slug, yes } => run_project_delete(&remote, &slug, yes),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("spadock=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        // The blocking HTTP client and interactive prompts must stay off the runtime.
        Commands::Admin { command } => {
            tokio::task::spawn_blocking(move || run_admin(command)).await??;
        }
        Commands::Project { command } => {
            tokio::task::spawn_blocking(move || run_project(command)).await??;
        }
        Commands::Serve {
            host,
            port,
            data_dir,
            public_base_url,
        } => {
            serve(ServerConfig {
                host,
                port,
                data_dir: data_dir.into(),
                public_base_url,
            })
            .await?;
        }
    }

    Ok(())
}
