//! # Spadock
//!
//! A host for prebuilt single-page apps: uploaded ZIP archives are screened,
//! extracted into per-tenant storage and cataloged, and pages embed the result
//! through a planned set of style and script tags. Usable both as a
//! standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! spadock = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spadock::config::{ServerConfig, Settings};
//! use spadock::server::{AppState, create_router};
//! use spadock::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(&config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let settings = Settings::load(&config.settings_path()).unwrap();
//! let state = Arc::new(AppState::new(Arc::new(store), &config, settings));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod store;
pub mod types;
pub mod validation;
