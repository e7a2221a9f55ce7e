use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::bytes::RegexSet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::ACCESS_FILE;
use super::rules::{
    check_entry_path, dangerous_extension, dangerous_extensions, extension_of,
    find_suspicious_pattern, is_static_asset, is_text_like, sanitize_segment, static_extensions,
};
use super::scanner::{Severity, Violation, ViolationKind};
use crate::config::Settings;
use crate::error::{Error, Phase, Result};
use crate::types::AssetType;

const FRAMEWORK_SCAN_LIMIT: usize = 2 * 1024 * 1024;
const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

static FRAMEWORK_MARKERS: LazyLock<(RegexSet, Vec<&'static str>)> = LazyLock::new(|| {
    let markers = [
        ("react", r"__SECRET_INTERNALS_DO_NOT_USE|react\.production\.min|react-dom"),
        ("vue", r"__VUE__|__vue_app__|Vue\.createApp"),
        ("angular", r"ng-version|@angular/core"),
        ("svelte", r"SvelteComponent|svelte-[a-z0-9]{6}"),
        ("preact", r"preact"),
        ("solid", r"solid-js"),
    ];
    let set = RegexSet::new(markers.iter().map(|(_, p)| *p)).expect("valid framework markers");
    (set, markers.iter().map(|(name, _)| *name).collect())
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildTool {
    CreateReactApp,
    Vite,
    Webpack,
    NextStatic,
    AngularCli,
    Parcel,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFile {
    pub original_name: String,
    /// Sanitized path relative to the extraction target.
    pub final_path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<AssetType>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureAnalysis {
    pub build_tool: BuildTool,
    pub frameworks: Vec<String>,
    pub has_source_maps: bool,
    pub entry_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub files: Vec<ExtractedFile>,
    pub skipped: Vec<SkippedEntry>,
    pub total_size: u64,
    pub structure: StructureAnalysis,
}

/// Diagnostic summary written next to an extracted project.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub project_slug: String,
    pub extracted_file_count: usize,
    pub total_size: u64,
    pub per_type: BTreeMap<String, usize>,
    pub build_tool: BuildTool,
    pub frameworks: Vec<String>,
    pub has_source_maps: bool,
    pub skipped: Vec<SkippedEntry>,
    pub generated_at: DateTime<Utc>,
}

impl ExtractionResult {
    #[must_use]
    pub fn report(&self, project_slug: &str) -> ExtractionReport {
        let mut per_type = BTreeMap::new();
        for file in &self.files {
            let key = file.asset_type.map_or("unlisted", AssetType::as_str);
            *per_type.entry(key.to_string()).or_insert(0) += 1;
        }

        ExtractionReport {
            project_slug: project_slug.to_string(),
            extracted_file_count: self.files.len(),
            total_size: self.total_size,
            per_type,
            build_tool: self.structure.build_tool,
            frameworks: self.structure.frameworks.clone(),
            has_source_maps: self.structure.has_source_maps,
            skipped: self.skipped.clone(),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafeExtractor {
    max_file_count: usize,
    max_file_bytes: u64,
    max_total_bytes: u64,
    max_path_depth: usize,
    block_suspicious: bool,
    allow_list_only: bool,
}

struct ExtractState {
    files: Vec<ExtractedFile>,
    skipped: Vec<SkippedEntry>,
    claims: PathClaims,
    entries: usize,
    inflated: u64,
    total_size: u64,
    frameworks: Vec<String>,
}

impl ExtractState {
    fn skip(&mut self, slug: &str, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(slug, entry = name, "Skipping archive entry: {reason}");
        self.skipped.push(SkippedEntry {
            name: name.to_string(),
            reason,
        });
    }
}

impl SafeExtractor {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            max_file_count: settings.max_file_count,
            max_file_bytes: settings.max_file_bytes,
            max_total_bytes: settings.max_total_uncompressed_bytes,
            max_path_depth: settings.max_path_depth,
            block_suspicious: settings.block_suspicious_files,
            allow_list_only: settings.allow_list_only,
        }
    }

    /// Extracts `archive_path` into `target_dir`, which must not exist yet. The
    /// directory is claimed with a single `create_dir`, so a concurrent
    /// extraction to the same target fails with `Conflict` and leaves the
    /// other one alone. On any later fatal error the target is removed.
    pub fn extract(
        &self,
        archive_path: &Path,
        target_dir: &Path,
        project_slug: &str,
    ) -> Result<ExtractionResult> {
        prepare_target(target_dir, project_slug)?;

        match self.extract_into(archive_path, target_dir, project_slug) {
            Ok(result) => {
                info!(
                    slug = project_slug,
                    files = result.files.len(),
                    skipped = result.skipped.len(),
                    bytes = result.total_size,
                    "Extraction complete"
                );
                if !result.skipped.is_empty() {
                    warn!(
                        slug = project_slug,
                        "Skipped {} archive entries: {}",
                        result.skipped.len(),
                        result
                            .skipped
                            .iter()
                            .map(|s| format!("{} ({})", s.name, s.reason))
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                Ok(result)
            }
            Err(e) => {
                warn!(slug = project_slug, "Extraction failed, cleaning up: {e}");
                remove_dir_logged(target_dir);
                Err(e)
            }
        }
    }

    fn extract_into(
        &self,
        archive_path: &Path,
        target_dir: &Path,
        slug: &str,
    ) -> Result<ExtractionResult> {
        let file = File::open(archive_path).map_err(|e| Error::fs(Phase::Extract, e))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| corrupt(format!("Archive could not be opened: {e}")))?;

        let base = target_dir
            .canonicalize()
            .map_err(|e| Error::fs(Phase::Extract, e))?;

        let mut state = ExtractState {
            files: Vec::new(),
            skipped: Vec::new(),
            claims: PathClaims::default(),
            entries: 0,
            inflated: 0,
            total_size: 0,
            frameworks: Vec::new(),
        };

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| corrupt(format!("Entry {index} is unreadable: {e}")))?;
            let name = entry.name().to_string();

            if entry.is_dir() {
                continue;
            }
            state.entries += 1;
            if state.entries > self.max_file_count {
                return Err(Error::Security {
                    phase: Phase::Extract,
                    violations: vec![violation(
                        ViolationKind::TooManyFiles,
                        &name,
                        format!("Archive contains more than {} files", self.max_file_count),
                    )],
                });
            }
            if entry
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                state.skip(slug, &name, "symbolic link");
                continue;
            }

            let segments = match check_entry_path(&name, self.max_path_depth) {
                Ok(segments) => segments,
                Err(issue) => {
                    state.skip(slug, &name, issue.to_string());
                    continue;
                }
            };
            if let Some(ext) = dangerous_extension(&name) {
                state.skip(slug, &name, format!("dangerous file type '{ext}'"));
                continue;
            }
            if self.allow_list_only && !is_static_asset(&name) {
                state.skip(slug, &name, "not a static asset type");
                continue;
            }

            let Some(relative) = sanitize_relative(&segments) else {
                state.skip(slug, &name, "no usable path after sanitizing");
                continue;
            };

            let mut content = Vec::with_capacity(entry.size().min(1024 * 1024) as usize);
            (&mut entry)
                .take(self.max_file_bytes + 1)
                .read_to_end(&mut content)
                .map_err(|e| corrupt(format!("'{name}' could not be decompressed: {e}")))?;

            let size = content.len() as u64;
            if size > self.max_file_bytes {
                return Err(Error::Security {
                    phase: Phase::Extract,
                    violations: vec![violation(
                        ViolationKind::FileTooLarge,
                        &name,
                        format!("'{name}' expands beyond the per-file limit of {} bytes", self.max_file_bytes),
                    )],
                });
            }
            state.inflated += size;
            if state.inflated > self.max_total_bytes {
                return Err(Error::Security {
                    phase: Phase::Extract,
                    violations: vec![violation(
                        ViolationKind::TotalSizeExceeded,
                        &name,
                        format!("Archive expands beyond {} bytes", self.max_total_bytes),
                    )],
                });
            }

            if is_text_like(&name) {
                if let Some(pattern) = find_suspicious_pattern(&content) {
                    if self.block_suspicious {
                        state.skip(slug, &name, format!("suspicious content ({pattern})"));
                        continue;
                    }
                    warn!(slug, entry = %name, "Extracting file with suspicious content ({pattern})");
                }
            }

            // Nothing is created on disk for an entry until it has passed every check.
            let Some(relative) = state.claims.claim(&relative) else {
                state.skip(slug, &name, "a parent path is a file extracted earlier");
                continue;
            };

            let dest = target_dir.join(&relative);
            let parent = dest.parent().unwrap_or(target_dir);
            create_dirs(parent, target_dir)?;
            let resolved_parent = parent
                .canonicalize()
                .map_err(|e| Error::fs(Phase::Extract, e))?;
            if !resolved_parent.starts_with(&base) {
                state.skip(slug, &name, "resolves outside the target directory");
                continue;
            }

            write_file(&dest, &content)?;
            state.total_size += size;

            let asset_type = AssetType::from_path(&relative);
            if asset_type == Some(AssetType::Js) {
                detect_frameworks(&content, &mut state.frameworks);
            }

            state.files.push(ExtractedFile {
                original_name: name,
                final_path: relative,
                size,
                asset_type,
                content_hash: hex::encode(Sha256::digest(&content)),
            });
        }

        write_access_file(target_dir)?;

        let entry_points = find_entry_points(&state.files);
        if entry_points.is_empty() {
            return Err(Error::Structure(
                "archive has no index.html and no JavaScript entry point".to_string(),
            ));
        }

        let structure = StructureAnalysis {
            build_tool: detect_build_tool(&state.files),
            frameworks: state.frameworks,
            has_source_maps: state.files.iter().any(|f| f.final_path.ends_with(".map")),
            entry_points,
        };

        Ok(ExtractionResult {
            files: state.files,
            skipped: state.skipped,
            total_size: state.total_size,
            structure,
        })
    }
}

fn corrupt(message: String) -> Error {
    Error::Security {
        phase: Phase::Extract,
        violations: vec![Violation {
            kind: ViolationKind::CorruptArchive,
            severity: Severity::Hard,
            entry: None,
            message,
        }],
    }
}

fn violation(kind: ViolationKind, entry: &str, message: String) -> Violation {
    Violation {
        kind,
        severity: Severity::Hard,
        entry: Some(entry.to_string()),
        message,
    }
}

fn prepare_target(target_dir: &Path, slug: &str) -> Result<()> {
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::fs(Phase::Extract, e))?;
    }
    match fs::create_dir(target_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::Conflict(format!(
                "an extraction for '{slug}' is already in progress"
            )));
        }
        Err(e) => return Err(Error::fs(Phase::Extract, e)),
    }
    set_dir_permissions(target_dir);
    Ok(())
}

fn sanitize_relative(segments: &[String]) -> Option<String> {
    let cleaned = segments
        .iter()
        .map(|s| sanitize_segment(s))
        .collect::<Option<Vec<_>>>()?;
    Some(cleaned.join("/"))
}

/// Output paths handed out so far, lowercased so case-only variants collide.
#[derive(Default)]
struct PathClaims {
    files: HashSet<String>,
    dirs: HashSet<String>,
}

impl PathClaims {
    /// Claims `relative` as a file and its ancestors as directories. A taken
    /// name gets a numbered variant; `None` when an ancestor is already a file.
    fn claim(&mut self, relative: &str) -> Option<String> {
        let lower = relative.to_ascii_lowercase();
        let ancestors: Vec<&str> = lower
            .match_indices('/')
            .map(|(i, _)| &lower[..i])
            .collect();
        if ancestors.iter().any(|a| self.files.contains(*a)) {
            return None;
        }

        let mut candidate = relative.to_string();
        let mut n = 1;
        while !self.is_free(&candidate) {
            candidate = numbered(relative, n);
            n += 1;
        }

        self.files.insert(candidate.to_ascii_lowercase());
        self.dirs.extend(ancestors.into_iter().map(str::to_string));
        Some(candidate)
    }

    fn is_free(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        !self.files.contains(&lower) && !self.dirs.contains(&lower)
    }
}

fn numbered(relative: &str, n: usize) -> String {
    let (dir, file) = match relative.rsplit_once('/') {
        Some((dir, file)) => (format!("{dir}/"), file),
        None => (String::new(), relative),
    };
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{dir}{stem}-{n}.{ext}"),
        _ => format!("{dir}{file}-{n}"),
    }
}

/// Creates `dir` and any missing ancestors below `root`, with traversable permissions.
fn create_dirs(dir: &Path, root: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    let missing: Vec<PathBuf> = dir
        .ancestors()
        .take_while(|a| *a != root && !a.exists())
        .map(Path::to_path_buf)
        .collect();
    fs::create_dir_all(dir).map_err(|e| Error::fs(Phase::Extract, e))?;
    for created in missing {
        set_dir_permissions(&created);
    }
    Ok(())
}

fn write_file(dest: &Path, content: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    let mut file = options
        .open(dest)
        .map_err(|e| Error::fs(Phase::Extract, e))?;
    file.write_all(content)
        .map_err(|e| Error::fs(Phase::Extract, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o755)) {
        warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) {}

fn write_access_file(target_dir: &Path) -> Result<()> {
    let denied = dangerous_extensions().join("|");
    let allowed = static_extensions().join("|");
    let handlers = dangerous_extensions()
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join(" ");

    let content = format!(
        "# Generated by spadock. This directory serves static build output only.\n\
         Options -Indexes -ExecCGI\n\
         RemoveHandler {handlers}\n\
         RemoveType {handlers}\n\
         <FilesMatch \"(?i)\\.({denied})$\">\n    Require all denied\n</FilesMatch>\n\
         <FilesMatch \"(?i)\\.({allowed})$\">\n    Require all granted\n</FilesMatch>\n"
    );

    write_file(&target_dir.join(ACCESS_FILE), content.as_bytes())
}

fn find_entry_points(files: &[ExtractedFile]) -> Vec<String> {
    let mut entries: Vec<String> = files
        .iter()
        .filter(|f| f.final_path == "index.html" || f.final_path.ends_with("/index.html"))
        .map(|f| f.final_path.clone())
        .collect();

    if entries.is_empty() {
        entries = files
            .iter()
            .filter(|f| {
                f.asset_type == Some(AssetType::Js)
                    || matches!(extension_of(&f.final_path).as_deref(), Some("ts" | "tsx"))
            })
            .map(|f| f.final_path.clone())
            .collect();
    }
    entries.sort_by_key(|p| p.matches('/').count());
    entries
}

fn detect_build_tool(files: &[ExtractedFile]) -> BuildTool {
    let has = |pred: &dyn Fn(&str) -> bool| files.iter().any(|f| pred(&f.final_path));
    let file_name = |p: &str| p.rsplit('/').next().unwrap_or(p).to_string();

    if has(&|p| p == "asset-manifest.json")
        || has(&|p| p.starts_with("static/js/") && p.ends_with(".chunk.js"))
    {
        BuildTool::CreateReactApp
    } else if has(&|p| p.ends_with(".vite/manifest.json"))
        || has(&|p| {
            let name = file_name(p);
            p.starts_with("assets/") && name.starts_with("index-") && name.ends_with(".js")
        })
    {
        BuildTool::Vite
    } else if has(&|p| p.starts_with("_next/")) {
        BuildTool::NextStatic
    } else if has(&|p| p == "ngsw.json")
        || (has(&|p| file_name(p).starts_with("polyfills"))
            && has(&|p| file_name(p).starts_with("runtime.")))
    {
        BuildTool::AngularCli
    } else if has(&|p| p.ends_with("parcel-manifest.json")) {
        BuildTool::Parcel
    } else if has(&|p| p.ends_with("webpack-manifest.json"))
        || has(&|p| file_name(p).starts_with("runtime~"))
        || has(&|p| p.ends_with(".bundle.js"))
    {
        BuildTool::Webpack
    } else {
        BuildTool::Unknown
    }
}

fn detect_frameworks(content: &[u8], found: &mut Vec<String>) {
    let (set, names) = &*FRAMEWORK_MARKERS;
    let window = &content[..content.len().min(FRAMEWORK_SCAN_LIMIT)];
    for index in set.matches(window).iter() {
        let name = names[index];
        if !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    }
}

fn remove_dir_logged(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clean up {}: {e}", dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn build_zip(dir: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("upload.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    fn lenient() -> Settings {
        Settings {
            block_suspicious_files: false,
            ..Settings::default()
        }
    }

    #[test]
    fn test_extracts_files_with_hashes() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[
                ("index.html", b"<html></html>"),
                ("static/js/main.abc123.js", b"console.log('react-dom')"),
                ("static/css/main.css", b"body{}"),
            ],
        );
        let target = temp.path().join("out");

        let result = SafeExtractor::new(&Settings::default())
            .extract(&archive, &target, "demo")
            .unwrap();

        assert_eq!(result.files.len(), 3);
        assert!(result.skipped.is_empty());
        assert_eq!(result.structure.entry_points, vec!["index.html"]);
        assert_eq!(result.structure.frameworks, vec!["react"]);
        assert!(!result.structure.has_source_maps);
        assert!(target.join("static/js/main.abc123.js").is_file());
        assert!(target.join(ACCESS_FILE).is_file());

        let css = result
            .files
            .iter()
            .find(|f| f.final_path == "static/css/main.css")
            .unwrap();
        assert_eq!(css.content_hash, hex::encode(Sha256::digest(b"body{}")));
        assert_eq!(css.asset_type, Some(AssetType::Css));
    }

    #[test]
    fn test_traversal_entry_is_skipped_not_written() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[("index.html", b"<html></html>"), ("../../etc/passwd", b"root:x")],
        );
        let projects = temp.path().join("projects");
        let target = projects.join("demo");

        let result = SafeExtractor::new(&lenient())
            .extract(&archive, &target, "demo")
            .unwrap();

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].name, "../../etc/passwd");
        assert!(!temp.path().join("etc").exists());
        assert!(!projects.join("etc").exists());
    }

    #[test]
    fn test_dangerous_and_suspicious_entries_skipped() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[
                ("index.html", b"<html></html>"),
                ("api/shell.php", b"<?php ?>"),
                ("evil.js", b"eval(atob('YWxlcnQoMSk='))"),
            ],
        );
        let target = temp.path().join("out");

        let result = SafeExtractor::new(&Settings::default())
            .extract(&archive, &target, "demo")
            .unwrap();

        let skipped: Vec<&str> = result.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["api/shell.php", "evil.js"]);
        assert!(!target.join("api/shell.php").exists());
        assert!(!target.join("evil.js").exists());
    }

    #[test]
    fn test_missing_entry_point_cleans_up() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(temp.path(), &[("styles/site.css", b"body{}")]);
        let target = temp.path().join("out");

        let result = SafeExtractor::new(&Settings::default()).extract(&archive, &target, "demo");

        assert!(matches!(result, Err(Error::Structure(_))));
        assert!(!target.exists());
    }

    #[test]
    fn test_existing_target_is_refused() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(temp.path(), &[("index.html", b"<html></html>")]);
        let target = temp.path().join("out");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("other.js"), "in flight").unwrap();

        let result = SafeExtractor::new(&Settings::default()).extract(&archive, &target, "demo");

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(target.join("other.js").exists());
    }

    #[test]
    fn test_claimed_empty_target_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(temp.path(), &[("index.html", b"<html></html>")]);
        let target = temp.path().join("out");
        // Another extraction has created the directory but written nothing yet.
        fs::create_dir_all(&target).unwrap();

        let result = SafeExtractor::new(&Settings::default()).extract(&archive, &target, "demo");

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(target.is_dir());
        assert!(!target.join("index.html").exists());
    }

    #[test]
    fn test_file_and_directory_clash_is_skipped() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[
                ("index.html", b"<html></html>"),
                ("lib", b"plain file"),
                ("lib/app.js", b"console.log(1)"),
                ("vendor/react.js", b"1"),
                ("vendor", b"plain file"),
            ],
        );
        let target = temp.path().join("out");

        let result = SafeExtractor::new(&Settings::default())
            .extract(&archive, &target, "demo")
            .unwrap();

        let skipped: Vec<&str> = result.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["lib/app.js"]);
        assert!(target.join("lib").is_file());
        assert!(target.join("vendor/react.js").is_file());
        assert!(target.join("vendor-1").is_file());
    }

    #[test]
    fn test_skipped_entries_leave_no_directories() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[
                ("index.html", b"<html></html>"),
                ("hidden/deep/evil.js", b"eval(atob('YWxlcnQoMSk='))"),
            ],
        );
        let target = temp.path().join("out");

        let result = SafeExtractor::new(&Settings::default())
            .extract(&archive, &target, "demo")
            .unwrap();

        assert_eq!(result.skipped.len(), 1);
        assert!(!target.join("hidden").exists());
    }

    #[test]
    fn test_file_count_enforced_during_extraction() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[("index.html", b"<html></html>"), ("a.js", b"1"), ("b.js", b"2")],
        );
        let target = temp.path().join("out");

        let settings = Settings {
            max_file_count: 2,
            ..Settings::default()
        };
        let result = SafeExtractor::new(&settings).extract(&archive, &target, "demo");

        assert!(matches!(result, Err(Error::Security { .. })));
        assert!(!target.exists());
    }

    #[test]
    fn test_per_file_limit_enforced_on_actual_bytes() {
        let temp = TempDir::new().unwrap();
        let big = vec![b'x'; 4096];
        let archive = build_zip(temp.path(), &[("index.html", b"ok"), ("big.js", &big)]);
        let target = temp.path().join("out");

        let settings = Settings {
            max_file_bytes: 1024,
            ..Settings::default()
        };
        let result = SafeExtractor::new(&settings).extract(&archive, &target, "demo");

        assert!(matches!(
            result,
            Err(Error::Security { phase: Phase::Extract, .. })
        ));
        assert!(!target.exists());
    }

    #[test]
    fn test_allow_list_only_skips_unknown_types() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[("index.html", b"<html></html>"), ("notes.md", b"# hi")],
        );
        let target = temp.path().join("out");

        let settings = Settings {
            allow_list_only: true,
            ..Settings::default()
        };
        let result = SafeExtractor::new(&settings)
            .extract(&archive, &target, "demo")
            .unwrap();

        assert_eq!(result.skipped.len(), 1);
        assert!(!target.join("notes.md").exists());
    }

    #[test]
    fn test_path_claims_avoid_collisions() {
        let mut claims = PathClaims::default();
        assert_eq!(claims.claim("a/Main.js").as_deref(), Some("a/Main.js"));
        assert_eq!(claims.claim("a/main.js").as_deref(), Some("a/main-1.js"));
        assert_eq!(claims.claim("a/main.js").as_deref(), Some("a/main-2.js"));
        assert_eq!(claims.claim("LICENSE").as_deref(), Some("LICENSE"));
        assert_eq!(claims.claim("license").as_deref(), Some("license-1"));
        assert_eq!(claims.claim("A").as_deref(), Some("A-1"));
        assert_eq!(claims.claim("license/x.js"), None);
    }

    #[test]
    fn test_build_tool_detection() {
        let file = |p: &str| ExtractedFile {
            original_name: p.to_string(),
            final_path: p.to_string(),
            size: 1,
            asset_type: AssetType::from_path(p),
            content_hash: String::new(),
        };

        assert_eq!(
            detect_build_tool(&[file("asset-manifest.json"), file("index.html")]),
            BuildTool::CreateReactApp
        );
        assert_eq!(
            detect_build_tool(&[file("assets/index-4f2a1b.js"), file("index.html")]),
            BuildTool::Vite
        );
        assert_eq!(
            detect_build_tool(&[file("_next/static/chunks/main.js")]),
            BuildTool::NextStatic
        );
        assert_eq!(detect_build_tool(&[file("index.html")]), BuildTool::Unknown);
    }

    #[test]
    fn test_report_counts_types() {
        let temp = TempDir::new().unwrap();
        let archive = build_zip(
            temp.path(),
            &[
                ("index.html", b"<html></html>"),
                ("a.js", b"1"),
                ("b.js", b"2"),
                ("a.js.map", b"{}"),
            ],
        );
        let target = temp.path().join("out");

        let result = SafeExtractor::new(&Settings::default())
            .extract(&archive, &target, "demo")
            .unwrap();
        let report = result.report("demo");

        assert_eq!(report.extracted_file_count, 4);
        assert_eq!(report.per_type.get("js"), Some(&2));
        assert_eq!(report.per_type.get("html"), Some(&1));
        assert_eq!(report.per_type.get("other"), Some(&1));
        assert!(report.has_source_maps);
    }
}
