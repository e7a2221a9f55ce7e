use std::path::PathBuf;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the server (create database, default tenant and admin token)
    Init {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },

    /// Manage access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Show server status information
    Info {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TenantCommands {
    /// Add a tenant
    Add {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Tenant name (lowercase letters, digits, '-' and '_')
        name: String,

        /// Also create a token scoped to the new tenant
        #[arg(long)]
        create_token: bool,
    },

    /// List tenants with their project counts
    List {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Create a new access token
    Create {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Tenant the token manages (omit for an admin token)
        #[arg(long)]
        tenant: Option<String>,

        /// Token expiration in days (omit for no expiration)
        #[arg(long)]
        expires_days: Option<i64>,
    },

    /// List access tokens
    List {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Revoke an access token
    Revoke {
        /// Data directory for database and project storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Token ID to revoke
        token_id: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

/// Connection settings for commands that talk to a running server.
#[derive(Args, Clone)]
pub struct RemoteArgs {
    /// Server URL
    #[arg(long, env = "SPADOCK_SERVER", default_value = "http://127.0.0.1:8080")]
    pub server: String,

    /// Access token
    #[arg(long, env = "SPADOCK_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Tenant to act on (admin tokens only)
    #[arg(long, env = "SPADOCK_TENANT")]
    pub tenant: Option<String>,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Upload a ZIP archive as a new project or a new version of one
    Upload {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Path to the ZIP archive
        archive: PathBuf,

        /// Project slug
        #[arg(long)]
        slug: String,

        /// Display name (defaults to the slug)
        #[arg(long)]
        display_name: Option<String>,

        /// Project description
        #[arg(long)]
        description: Option<String>,

        /// Send the archive in chunks of this many MiB instead of one request
        #[arg(long)]
        chunk_mib: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List projects
    List {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Activate or deactivate a project
    Status {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Project slug
        slug: String,

        /// Deactivate instead of activate
        #[arg(long)]
        inactive: bool,
    },

    /// Delete a project (a backup of its files is kept on the server)
    Delete {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Project slug
        slug: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}
