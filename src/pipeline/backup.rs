use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::walk::copy_tree;
use crate::error::{Error, Phase, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Timestamped full copies of project directories:
/// `<data_dir>/backups/<tenant>/<slug>/<timestamp>/`.
pub struct BackupStore {
    base_path: PathBuf,
    retention: usize,
}

impl BackupStore {
    pub fn new(data_dir: &Path, retention: usize) -> Self {
        Self {
            base_path: data_dir.join("backups"),
            retention,
        }
    }

    fn project_dir(&self, tenant: &str, slug: &str) -> PathBuf {
        self.base_path.join(tenant).join(slug)
    }

    /// Copies `source` into a new timestamped backup and prunes old copies.
    pub fn backup(&self, tenant: &str, slug: &str, source: &Path) -> Result<PathBuf> {
        let root = self.project_dir(tenant, slug);
        fs::create_dir_all(&root).map_err(|e| Error::fs(Phase::Backup, e))?;

        let stamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let mut dest = root.join(&stamp);
        let mut n = 1;
        while dest.exists() {
            dest = root.join(format!("{stamp}-{n}"));
            n += 1;
        }

        if let Err(e) = copy_tree(source, &dest) {
            let _ = fs::remove_dir_all(&dest);
            return Err(Error::fs(Phase::Backup, e));
        }
        info!(tenant, slug, path = %dest.display(), "Backed up project");

        match self.prune(tenant, slug) {
            Ok(0) => {}
            Ok(removed) => debug!(tenant, slug, removed, "Pruned old backups"),
            Err(e) => warn!(tenant, slug, "Failed to prune backups: {e}"),
        }
        Ok(dest)
    }

    /// Backups for a project, newest first.
    pub fn list(&self, tenant: &str, slug: &str) -> Result<Vec<BackupEntry>> {
        let root = self.project_dir(tenant, slug);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::fs(Phase::Backup, e)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::fs(Phase::Backup, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let stamp = name.split('-').next().unwrap_or(&name);
            let Ok(created) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) else {
                continue;
            };
            backups.push(BackupEntry {
                path: entry.path(),
                created_at: created.and_utc(),
            });
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.path.cmp(&a.path)));
        Ok(backups)
    }

    /// Deletes all but the newest `retention` backups. Returns how many were removed.
    pub fn prune(&self, tenant: &str, slug: &str) -> Result<usize> {
        let backups = self.list(tenant, slug)?;
        let mut removed = 0;
        for old in backups.iter().skip(self.retention.max(1)) {
            fs::remove_dir_all(&old.path).map_err(|e| Error::fs(Phase::Backup, e))?;
            removed += 1;
        }
        Ok(removed)
    }
}
