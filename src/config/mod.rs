mod server;
mod settings;

pub use server::ServerConfig;
pub use settings::{CdnSettings, SETTINGS_FILE, Settings, VirusScanSettings};
