#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use spadock::config::Settings;
use spadock::events::EventBus;
use spadock::pipeline::{UploadPipeline, UploadRequest};
use spadock::store::{SqliteStore, Store};
use spadock::types::{DEFAULT_TENANT, Tenant};
use tempfile::TempDir;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Writes a ZIP archive with the given entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(fs::File::create(path).expect("create archive"));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        zip.write_all(data).expect("write entry");
    }
    zip.finish().expect("finish archive");
}

/// In-memory ZIP archive bytes, for request bodies.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        zip.write_all(data).expect("write entry");
    }
    zip.finish().expect("finish archive").into_inner()
}

/// The three-file build used across scenarios.
pub const CRA_BUILD: &[(&str, &[u8])] = &[
    ("index.html", b"<!doctype html><html><body><div id=\"root\"></div></body></html>"),
    ("static/js/main.abc123.js", b"console.log('main');"),
    ("static/css/main.css", b"body { margin: 0; }"),
];

pub struct PipelineContext {
    pub temp_dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub events: EventBus,
    pub pipeline: UploadPipeline,
    pub tenant: Tenant,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(SqliteStore::in_memory().expect("open store"));
        store.initialize().expect("initialize store");

        let tenant = Tenant {
            id: "tenant-default".to_string(),
            name: DEFAULT_TENANT.to_string(),
            created_at: Utc::now(),
        };
        store.create_tenant(&tenant).expect("create tenant");

        let events = EventBus::default();
        let pipeline = UploadPipeline::new(
            store.clone(),
            Arc::new(settings),
            temp_dir.path(),
            events.clone(),
        );

        Self {
            temp_dir,
            store,
            events,
            pipeline,
            tenant,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes an archive under an `uploads-in` directory outside the project tree.
    pub fn archive(&self, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let dir = self.data_dir().join("uploads-in");
        fs::create_dir_all(&dir).expect("create archive dir");
        let path = dir.join(name);
        write_zip(&path, entries);
        path
    }

    pub fn request(&self, slug: &str, archive_path: PathBuf) -> UploadRequest {
        UploadRequest {
            tenant: self.tenant.clone(),
            slug: slug.to_string(),
            display_name: None,
            description: None,
            archive_path,
        }
    }
}
