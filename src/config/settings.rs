use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.toml";

const MB: u64 = 1024 * 1024;

/// Operator settings read from `settings.toml` in the data directory.
/// Every key is optional; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Largest archive accepted by the upload endpoints, in bytes.
    pub max_upload_bytes: u64,
    pub max_file_count: usize,
    /// Ceiling for the sum of uncompressed entry sizes.
    pub max_total_uncompressed_bytes: u64,
    pub max_file_bytes: u64,
    pub max_path_depth: usize,
    /// Uncompressed/compressed ratio above which a large entry is treated as a bomb.
    pub max_compression_ratio: u64,
    pub block_suspicious_files: bool,
    /// Only extract files whose extension is in the static asset set.
    pub allow_list_only: bool,
    pub inline_threshold_bytes: u64,
    pub cache_busting: bool,
    pub backup_retention: usize,
    pub cdn: CdnSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virus_scan: Option<VirusScanSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * MB,
            max_file_count: 1000,
            max_total_uncompressed_bytes: 500 * MB,
            max_file_bytes: 50 * MB,
            max_path_depth: 10,
            max_compression_ratio: 100,
            block_suspicious_files: true,
            allow_list_only: false,
            inline_threshold_bytes: 10 * 1024,
            cache_busting: true,
            backup_retention: 5,
            cdn: CdnSettings::default(),
            virus_scan: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Extensions eligible for CDN rewriting.
    pub extensions: Vec<String>,
    /// Glob patterns for URLs that must never be rewritten.
    pub excluded_patterns: Vec<String>,
}

impl Default for CdnSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            extensions: ["js", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "woff", "woff2"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            excluded_patterns: vec![
                "*/admin/*".to_string(),
                "*/wp-admin/*".to_string(),
                "*/login*".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirusScanSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.max_file_count == 0 {
            return Err(Error::Config("max_file_count must be positive".into()));
        }
        if self.max_path_depth == 0 {
            return Err(Error::Config("max_path_depth must be positive".into()));
        }
        if self.cdn.enabled && self.cdn.base_url.trim().is_empty() {
            return Err(Error::Config("cdn.base_url is required when cdn is enabled".into()));
        }
        for pattern in &self.cdn.excluded_patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::Config(format!("invalid cdn exclusion '{pattern}': {e}")))?;
        }
        Ok(())
    }

    /// Read-only dotted-key lookup, e.g. `lookup("cdn.enabled")`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<toml::Value> {
        let mut value = toml::Value::try_from(self).ok()?;
        for part in key.split('.') {
            value = value.as_table()?.get(part)?.clone();
        }
        Some(value)
    }
}
