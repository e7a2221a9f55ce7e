//! Upload intake: untrusted archive in, registered project with an ordered
//! asset catalog out.
//!
//! [`UploadPipeline::process`] runs scan, extraction, manifest parsing and
//! registration in order. Extraction goes to a per-slug staging directory
//! that is swapped into place only after parsing succeeds; the registry row
//! and the asset set are committed in one transaction, and a failed commit
//! restores the previous directory.

pub mod backup;
pub mod chunks;
pub mod extractor;
pub mod manifest;
pub mod rules;
pub mod scanner;
pub mod version;
pub mod virus;
mod walk;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use backup::{BackupEntry, BackupStore};
pub use chunks::ChunkStore;
pub use extractor::{
    BuildTool, ExtractedFile, ExtractionReport, ExtractionResult, SafeExtractor, SkippedEntry,
    StructureAnalysis,
};
pub use manifest::{ManifestKind, ManifestParser, classify};
pub use scanner::{ArchiveSecurityScanner, ScanResult, Severity, Violation, ViolationKind};
pub use version::{ContentFingerprint, fingerprint};
pub use virus::{CommandVirusScanner, VirusScanner, VirusVerdict};

use crate::config::Settings;
use crate::error::{Error, Phase, Result};
use crate::events::{EventBus, ProjectEvent};
use crate::store::Store;
use crate::types::{AssetRecord, LifecycleStatus, Project, Tenant};
use crate::validation::validate_slug;

/// Access-control file written into every project directory.
pub const ACCESS_FILE: &str = ".htaccess";
/// Extraction report written next to the extracted build.
pub const REPORT_FILE: &str = ".spadock-report.json";

const STAGING_DIR: &str = ".incoming";
const PREVIOUS_DIR: &str = ".previous";
const DELETING_DIR: &str = ".deleting";

/// Where project files live under the data directory.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    data_dir: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn projects_root(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    #[must_use]
    pub fn tenant_root(&self, tenant: &str) -> PathBuf {
        self.projects_root().join(tenant)
    }

    /// Storage path recorded on the project row, relative to the data directory.
    #[must_use]
    pub fn storage_path(tenant: &str, slug: &str) -> String {
        format!("projects/{tenant}/{slug}")
    }

    #[must_use]
    pub fn resolve(&self, storage_path: &str) -> PathBuf {
        self.data_dir.join(storage_path)
    }

    #[must_use]
    pub fn live_dir(&self, tenant: &str, slug: &str) -> PathBuf {
        self.tenant_root(tenant).join(slug)
    }

    fn work_dir(&self, tenant: &str, kind: &str, slug: &str) -> PathBuf {
        self.tenant_root(tenant).join(kind).join(slug)
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub tenant: Tenant,
    pub slug: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub archive_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub project: Project,
    pub assets: Vec<AssetRecord>,
    pub report: ExtractionReport,
    /// False when an existing project was replaced.
    pub created: bool,
}

pub struct UploadPipeline {
    store: Arc<dyn Store>,
    settings: Arc<Settings>,
    layout: StorageLayout,
    backups: BackupStore,
    virus_scanner: Option<Arc<dyn VirusScanner>>,
    events: EventBus,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        settings: Arc<Settings>,
        data_dir: &Path,
        events: EventBus,
    ) -> Self {
        let virus_scanner = settings
            .virus_scan
            .as_ref()
            .map(|vs| Arc::new(CommandVirusScanner::new(vs)) as Arc<dyn VirusScanner>);

        Self {
            store,
            backups: BackupStore::new(data_dir, settings.backup_retention),
            settings,
            layout: StorageLayout::new(data_dir),
            virus_scanner,
            events,
        }
    }

    #[must_use]
    pub fn with_virus_scanner(mut self, scanner: Arc<dyn VirusScanner>) -> Self {
        self.virus_scanner = Some(scanner);
        self
    }

    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates, extracts, catalogs and registers an uploaded archive.
    pub fn process(&self, request: &UploadRequest) -> Result<UploadOutcome> {
        let tenant = &request.tenant.name;
        let slug = &request.slug;

        let result = self.run(request);
        match &result {
            Ok(outcome) => info!(
                tenant,
                slug,
                version = %outcome.project.content_version,
                assets = outcome.assets.len(),
                created = outcome.created,
                "Project registered"
            ),
            Err(Error::Security { phase, violations }) => error!(
                tenant,
                slug,
                %phase,
                ?violations,
                "Upload rejected by security checks"
            ),
            Err(Error::Filesystem { phase, source }) => {
                error!(tenant, slug, %phase, "Upload failed: {source}");
            }
            Err(e) => error!(tenant, slug, "Upload failed: {e}"),
        }
        result
    }

    fn run(&self, request: &UploadRequest) -> Result<UploadOutcome> {
        let tenant = &request.tenant;
        let slug = request.slug.as_str();

        // Intake: nothing touches the project tree before these pass.
        validate_slug(slug).map_err(Error::Validation)?;
        let archive_size = fs::metadata(&request.archive_path)
            .map_err(|e| Error::fs(Phase::Intake, e))?
            .len();
        if archive_size > self.settings.max_upload_bytes {
            return Err(Error::Validation(format!(
                "upload of {archive_size} bytes exceeds the limit of {} bytes",
                self.settings.max_upload_bytes
            )));
        }

        self.scan(&request.archive_path, &tenant.name, slug)?;

        let previous = self.store.get_project_by_slug(&tenant.id, slug)?;

        let staging = self.layout.work_dir(&tenant.name, STAGING_DIR, slug);
        let extraction = SafeExtractor::new(&self.settings).extract(
            &request.archive_path,
            &staging,
            slug,
        )?;
        info!(
            tenant = %tenant.name,
            slug,
            phase = %Phase::Extract,
            files = extraction.files.len(),
            build_tool = ?extraction.structure.build_tool,
            "Archive extracted"
        );

        let parsed = self.parse_staged(&staging, slug, &extraction);
        let (assets, fingerprint, report) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                remove_dir_logged(&staging);
                return Err(e);
            }
        };

        let live = self.layout.live_dir(&tenant.name, slug);
        if live.exists() {
            if let Err(e) = self.backups.backup(&tenant.name, slug, &live) {
                remove_dir_logged(&staging);
                return Err(e);
            }
        }

        let previous_dir = self.layout.work_dir(&tenant.name, PREVIOUS_DIR, slug);
        self.swap_in(&staging, &live, &previous_dir)?;

        let now = Utc::now();
        let project = match &previous {
            Some(existing) => Project {
                display_name: request
                    .display_name
                    .clone()
                    .unwrap_or_else(|| existing.display_name.clone()),
                description: request.description.clone().or_else(|| existing.description.clone()),
                storage_path: StorageLayout::storage_path(&tenant.name, slug),
                content_size_bytes: fingerprint.total_size as i64,
                content_version: fingerprint.version.clone(),
                status: LifecycleStatus::Active,
                updated_at: now,
                ..existing.clone()
            },
            None => Project {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant.id.clone(),
                slug: slug.to_string(),
                display_name: request.display_name.clone().unwrap_or_else(|| slug.to_string()),
                description: request.description.clone(),
                storage_path: StorageLayout::storage_path(&tenant.name, slug),
                content_size_bytes: fingerprint.total_size as i64,
                content_version: fingerprint.version.clone(),
                status: LifecycleStatus::Active,
                settings: serde_json::json!({}),
                created_at: now,
                updated_at: now,
            },
        };

        let expected = previous.as_ref().map(|p| p.content_version.as_str());
        let stored = match self.store.commit_project(&project, &assets, expected) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    tenant = %tenant.name,
                    slug,
                    phase = %Phase::Commit,
                    "Registry commit failed, restoring previous files: {e}"
                );
                self.swap_back(&live, &previous_dir);
                return Err(match e {
                    Error::Conflict(msg) => Error::Conflict(msg),
                    other => Error::Persistence(other.to_string()),
                });
            }
        };
        remove_dir_logged(&previous_dir);

        let event = match &previous {
            Some(old) => ProjectEvent::Updated {
                tenant_id: tenant.id.clone(),
                slug: slug.to_string(),
                project_id: project.id.clone(),
                previous_version: old.content_version.clone(),
                content_version: project.content_version.clone(),
            },
            None => ProjectEvent::Registered {
                tenant_id: tenant.id.clone(),
                slug: slug.to_string(),
                project_id: project.id.clone(),
                content_version: project.content_version.clone(),
            },
        };
        self.events.publish(event);

        Ok(UploadOutcome {
            created: previous.is_none(),
            project,
            assets: stored,
            report,
        })
    }

    fn scan(&self, archive: &Path, tenant: &str, slug: &str) -> Result<()> {
        if let Some(scanner) = &self.virus_scanner {
            match scanner.scan(archive).map_err(|e| Error::fs(Phase::Scan, e))? {
                VirusVerdict::Clean => {}
                VirusVerdict::Infected(detail) => {
                    return Err(Error::Security {
                        phase: Phase::Scan,
                        violations: vec![Violation::hard(
                            ViolationKind::Malware,
                            None,
                            format!("Malware scanner rejected the archive: {detail}"),
                        )],
                    });
                }
            }
        }

        let result = ArchiveSecurityScanner::new(&self.settings).scan(archive);
        if !result.ok {
            return Err(Error::Security {
                phase: Phase::Scan,
                violations: result.blocking(self.settings.block_suspicious_files),
            });
        }
        if !result.violations.is_empty() {
            warn!(
                tenant,
                slug,
                phase = %Phase::Scan,
                violations = ?result.violations,
                "Archive passed with soft violations"
            );
        }
        Ok(())
    }

    fn parse_staged(
        &self,
        staging: &Path,
        slug: &str,
        extraction: &ExtractionResult,
    ) -> Result<(Vec<AssetRecord>, ContentFingerprint, ExtractionReport)> {
        let assets = ManifestParser::new(self.settings.max_path_depth).parse(staging)?;
        if assets.is_empty() {
            return Err(Error::Structure("no servable assets found".to_string()));
        }

        let report = extraction.report(slug);
        let json = serde_json::to_vec_pretty(&report)
            .map_err(|e| Error::Persistence(format!("failed to encode report: {e}")))?;
        fs::write(staging.join(REPORT_FILE), json).map_err(|e| Error::fs(Phase::Parse, e))?;

        let fingerprint = fingerprint(staging).map_err(|e| Error::fs(Phase::Parse, e))?;
        Ok((assets, fingerprint, report))
    }

    /// Moves `live` aside to `previous_dir` and `staging` into its place.
    fn swap_in(&self, staging: &Path, live: &Path, previous_dir: &Path) -> Result<()> {
        let commit_err = |e: std::io::Error| {
            remove_dir_logged(staging);
            Error::fs(Phase::Commit, e)
        };

        if let Some(parent) = previous_dir.parent() {
            fs::create_dir_all(parent).map_err(commit_err)?;
        }
        remove_dir_logged(previous_dir);

        let had_live = live.exists();
        if had_live {
            fs::rename(live, previous_dir).map_err(commit_err)?;
        }
        if let Err(e) = fs::rename(staging, live) {
            if had_live {
                if let Err(restore) = fs::rename(previous_dir, live) {
                    error!("Failed to restore {}: {restore}", live.display());
                }
            }
            return Err(commit_err(e));
        }
        Ok(())
    }

    fn swap_back(&self, live: &Path, previous_dir: &Path) {
        remove_dir_logged(live);
        if previous_dir.exists() {
            if let Err(e) = fs::rename(previous_dir, live) {
                error!(
                    "Failed to restore {} from {}: {e}",
                    live.display(),
                    previous_dir.display()
                );
            }
        }
    }

    /// Backs up and removes a project. Returns the backup location, if the
    /// project had files on disk.
    pub fn delete(&self, tenant: &Tenant, slug: &str) -> Result<Option<PathBuf>> {
        let project = self
            .store
            .get_project_by_slug(&tenant.id, slug)?
            .ok_or(Error::NotFound)?;

        let live = self.layout.resolve(&project.storage_path);
        let backup = if live.exists() {
            Some(self.backups.backup(&tenant.name, slug, &live)?)
        } else {
            None
        };

        let trash = self.layout.work_dir(&tenant.name, DELETING_DIR, slug);
        if live.exists() {
            if let Some(parent) = trash.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::fs(Phase::Delete, e))?;
            }
            remove_dir_logged(&trash);
            fs::rename(&live, &trash).map_err(|e| Error::fs(Phase::Delete, e))?;
        }

        if let Err(e) = self.store.delete_project(&project.id) {
            if trash.exists() {
                if let Err(restore) = fs::rename(&trash, &live) {
                    error!(tenant = %tenant.name, slug, "Failed to restore files: {restore}");
                }
            }
            return Err(Error::Persistence(e.to_string()));
        }
        remove_dir_logged(&trash);

        info!(
            tenant = %tenant.name,
            slug,
            phase = %Phase::Delete,
            backup = ?backup,
            "Project deleted"
        );
        self.events.publish(ProjectEvent::Deleted {
            tenant_id: tenant.id.clone(),
            slug: slug.to_string(),
            project_id: project.id,
            backup_path: backup.as_ref().map(|p| p.display().to_string()),
        });
        Ok(backup)
    }

    /// Activates or deactivates a project.
    pub fn set_status(
        &self,
        tenant: &Tenant,
        slug: &str,
        status: LifecycleStatus,
    ) -> Result<Project> {
        let mut project = self
            .store
            .get_project_by_slug(&tenant.id, slug)?
            .ok_or(Error::NotFound)?;

        if project.status != status {
            project.status = status;
            project.updated_at = Utc::now();
            self.store.update_project(&project)?;
            info!(tenant = %tenant.name, slug, %status, "Project status changed");
            self.events.publish(ProjectEvent::StatusChanged {
                tenant_id: tenant.id.clone(),
                slug: slug.to_string(),
                project_id: project.id.clone(),
                status,
            });
        }
        Ok(project)
    }

    /// Cleans up work directories left by interrupted uploads or deletes.
    ///
    /// A leftover previous copy whose live directory is missing is moved back
    /// into place; every other leftover is removed.
    pub fn sweep_stale(&self) -> Result<usize> {
        let root = self.layout.projects_root();
        let tenants = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::fs(Phase::Intake, e)),
        };

        let mut cleaned = 0;
        for tenant in tenants {
            let tenant = tenant.map_err(|e| Error::fs(Phase::Intake, e))?;
            if !tenant.path().is_dir() {
                continue;
            }
            let tenant_name = tenant.file_name().to_string_lossy().into_owned();

            for kind in [STAGING_DIR, PREVIOUS_DIR, DELETING_DIR] {
                let Ok(entries) = fs::read_dir(tenant.path().join(kind)) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let slug = entry.file_name().to_string_lossy().into_owned();
                    let live = self.layout.live_dir(&tenant_name, &slug);
                    if kind == PREVIOUS_DIR && !live.exists() {
                        warn!(tenant = %tenant_name, slug, "Restoring interrupted replacement");
                        if fs::rename(entry.path(), &live).is_ok() {
                            cleaned += 1;
                            continue;
                        }
                    }
                    warn!(tenant = %tenant_name, slug, "Removing stale {kind} directory");
                    remove_dir_logged(&entry.path());
                    cleaned += 1;
                }
            }
        }
        Ok(cleaned)
    }
}

fn remove_dir_logged(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
    }
}
