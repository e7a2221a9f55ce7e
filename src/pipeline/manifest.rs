//! Asset discovery. Known bundler manifests are tried first; a directory scan
//! is the fallback. Every path ends up as an [`AssetRecord`] with a content hash.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::walk::walk_files;
use super::{ACCESS_FILE, REPORT_FILE};
use crate::error::{Error, Phase, Result};
use crate::types::{AssetRecord, AssetType};

/// Manifest file names in the order they are tried.
pub const MANIFEST_CANDIDATES: &[&str] = &[
    "asset-manifest.json",
    ".vite/manifest.json",
    "manifest.json",
    "webpack-manifest.json",
    "build-manifest.json",
];

const CRITICAL_HINTS: &[&str] = &["runtime", "vendor", "main", "app", "chunk"];
/// How deep below the project root a manifest is looked for.
const MANIFEST_SEARCH_DEPTH: usize = 3;

/// Shape of a parsed manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// `{ "files": {...}, "entrypoints": [...] }`
    Cra,
    /// `{ "src/main.ts": { "file": "...", "css": [...], "isEntry": true } }`
    Vite,
    /// `{ "main.js": "main.1a2b.js", "runtime.js": "..." }`
    WebpackChunkMap,
    Generic,
}

/// Classifies a manifest document by shape alone.
#[must_use]
pub fn classify(json: &Value) -> ManifestKind {
    let Some(map) = json.as_object() else {
        return ManifestKind::Generic;
    };
    if map.is_empty() {
        return ManifestKind::Generic;
    }

    if map.get("files").is_some_and(Value::is_object)
        && map.get("entrypoints").is_some_and(Value::is_array)
    {
        return ManifestKind::Cra;
    }

    if map
        .values()
        .all(|v| v.as_object().is_some_and(|o| o.get("file").is_some_and(Value::is_string)))
    {
        return ManifestKind::Vite;
    }

    if map.values().all(Value::is_string) {
        return ManifestKind::WebpackChunkMap;
    }

    ManifestKind::Generic
}

/// An asset path found during discovery, before it is checked against disk.
#[derive(Debug, Clone)]
struct Candidate {
    path: String,
    critical: bool,
    dependencies: Vec<String>,
}

#[derive(Default)]
struct Candidates {
    items: Vec<Candidate>,
    index: HashMap<String, usize>,
}

impl Candidates {
    /// Adds a path. A path seen twice keeps its first position; criticality
    /// and dependencies are merged.
    fn push(&mut self, path: String, critical: bool, dependencies: Vec<String>) {
        if let Some(&i) = self.index.get(&path) {
            let existing = &mut self.items[i];
            existing.critical |= critical;
            for dep in dependencies {
                if !existing.dependencies.contains(&dep) {
                    existing.dependencies.push(dep);
                }
            }
            return;
        }
        self.index.insert(path.clone(), self.items.len());
        self.items.push(Candidate {
            path,
            critical,
            dependencies,
        });
    }
}

#[derive(Debug, Clone)]
pub struct ManifestParser {
    max_depth: usize,
}

impl ManifestParser {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Catalogs the assets of an extracted project, in load order.
    ///
    /// Returned records have empty `id` and `project_id`; the catalog assigns
    /// both when the set is stored.
    pub fn parse(&self, project_dir: &Path) -> Result<Vec<AssetRecord>> {
        for (manifest_path, base) in self.find_manifests(project_dir)? {
            let Some(json) = read_manifest(project_dir, &manifest_path) else {
                continue;
            };

            let kind = classify(&json);
            let mut candidates = Candidates::default();
            match kind {
                ManifestKind::Cra => collect_cra(&json, &base, &mut candidates),
                ManifestKind::Vite => collect_vite(&json, &base, &mut candidates),
                ManifestKind::WebpackChunkMap => collect_chunk_map(&json, &base, &mut candidates),
                ManifestKind::Generic => collect_generic(&json, &base, &mut candidates),
            }

            let records = build_records(project_dir, candidates)?;
            if records
                .iter()
                .any(|r| matches!(r.asset_type, AssetType::Css | AssetType::Js))
            {
                info!(
                    manifest = %manifest_path,
                    ?kind,
                    assets = records.len(),
                    "Cataloged assets from manifest"
                );
                return Ok(records);
            }
            debug!(manifest = %manifest_path, ?kind, "Manifest yielded no scripts or styles");
        }

        let records = self.scan_directory(project_dir)?;
        info!(assets = records.len(), "Cataloged assets from directory scan");
        Ok(records)
    }

    /// Manifest files present in the project, paired with the directory their
    /// paths are relative to. Shallower manifests come first.
    fn find_manifests(&self, project_dir: &Path) -> Result<Vec<(String, String)>> {
        let files = walk_files(project_dir, MANIFEST_SEARCH_DEPTH.min(self.max_depth))
            .map_err(|e| Error::fs(Phase::Parse, e))?;

        let mut found = Vec::new();
        for candidate in MANIFEST_CANDIDATES {
            for file in &files {
                let Some(prefix) = file.relative.strip_suffix(candidate) else {
                    continue;
                };
                if !(prefix.is_empty() || prefix.ends_with('/')) {
                    continue;
                }
                // A bare manifest.json is also the suffix of .vite/manifest.json.
                if *candidate == "manifest.json" && prefix.ends_with(".vite/") {
                    continue;
                }
                found.push((file.relative.clone(), prefix.to_string()));
            }
        }
        found.sort_by_key(|(path, _)| path.matches('/').count() - usize::from(path.contains(".vite/")));
        Ok(found)
    }

    fn scan_directory(&self, project_dir: &Path) -> Result<Vec<AssetRecord>> {
        let files = walk_files(project_dir, self.max_depth).map_err(|e| Error::fs(Phase::Parse, e))?;
        let mut candidates = Candidates::default();
        for file in files {
            if file.relative == ACCESS_FILE || file.relative == REPORT_FILE {
                continue;
            }
            let critical = looks_critical(&file.relative);
            candidates.push(file.relative, critical, Vec::new());
        }
        build_records(project_dir, candidates)
    }
}

fn read_manifest(project_dir: &Path, relative: &str) -> Option<Value> {
    let content = match fs::read(project_dir.join(relative)) {
        Ok(content) => content,
        Err(e) => {
            debug!(manifest = relative, "Manifest unreadable: {e}");
            return None;
        }
    };
    match serde_json::from_slice(&content) {
        Ok(json) => Some(json),
        Err(e) => {
            debug!(manifest = relative, "Manifest is not valid JSON: {e}");
            None
        }
    }
}

fn collect_cra(json: &Value, base: &str, out: &mut Candidates) {
    let mut earlier: Vec<(AssetType, String)> = Vec::new();
    for entry in json["entrypoints"].as_array().into_iter().flatten() {
        let Some(path) = entry.as_str().and_then(|p| clean_path(p, base)) else {
            continue;
        };
        let Some(asset_type) = AssetType::from_path(&path) else {
            continue;
        };
        let deps = earlier
            .iter()
            .filter(|(t, _)| *t == asset_type)
            .map(|(_, p)| p.clone())
            .collect();
        out.push(path.clone(), true, deps);
        earlier.push((asset_type, path));
    }

    for value in json["files"].as_object().into_iter().flat_map(|m| m.values()) {
        if let Some(path) = value.as_str().and_then(|p| clean_path(p, base)) {
            out.push(path, false, Vec::new());
        }
    }
}

fn collect_vite(json: &Value, base: &str, out: &mut Candidates) {
    let Some(chunks) = json.as_object() else {
        return;
    };
    let chunk_file = |key: &str| {
        chunks
            .get(key)
            .and_then(|c| c["file"].as_str())
            .and_then(|p| clean_path(p, base))
    };

    for chunk in chunks.values() {
        let Some(file) = chunk["file"].as_str().and_then(|p| clean_path(p, base)) else {
            continue;
        };
        let is_entry = chunk["isEntry"].as_bool().unwrap_or(false);

        let mut deps: Vec<String> = chunk["imports"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter_map(chunk_file)
            .collect();

        let css: Vec<String> = chunk["css"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter_map(|p| clean_path(p, base))
            .collect();
        for path in &css {
            out.push(path.clone(), is_entry, Vec::new());
        }
        deps.extend(css);

        out.push(file, is_entry, deps);

        for asset in chunk["assets"].as_array().into_iter().flatten() {
            if let Some(path) = asset.as_str().and_then(|p| clean_path(p, base)) {
                out.push(path, false, Vec::new());
            }
        }
    }
}

fn collect_chunk_map(json: &Value, base: &str, out: &mut Candidates) {
    let Some(map) = json.as_object() else {
        return;
    };

    let mut critical_js: Vec<(usize, String)> = Vec::new();
    let mut rest: Vec<(String, bool)> = Vec::new();
    for (name, value) in map {
        let Some(path) = value.as_str().and_then(|p| clean_path(p, base)) else {
            continue;
        };
        match chunk_rank(name) {
            Some(rank) if AssetType::from_path(&path) == Some(AssetType::Js) => {
                critical_js.push((rank, path));
            }
            Some(_) => rest.push((path, true)),
            None => rest.push((path, false)),
        }
    }

    // runtime, then vendor, then main; each depends on the ones before it.
    critical_js.sort_by_key(|(rank, _)| *rank);
    let mut earlier = Vec::new();
    for (_, path) in critical_js {
        out.push(path.clone(), true, earlier.clone());
        earlier.push(path);
    }
    for (path, critical) in rest {
        out.push(path, critical, Vec::new());
    }
}

/// Load rank of a critical webpack chunk name, `None` for ordinary chunks.
fn chunk_rank(name: &str) -> Option<usize> {
    let stem = name.split(['.', '~']).next().unwrap_or_default();
    match stem.to_ascii_lowercase().as_str() {
        "runtime" => Some(0),
        "vendor" | "vendors" => Some(1),
        "main" => Some(2),
        _ => None,
    }
}

fn collect_generic(json: &Value, base: &str, out: &mut Candidates) {
    let mut stack = vec![json];
    while let Some(value) = stack.pop() {
        match value {
            Value::String(s) => {
                if let Some(path) = clean_path(s, base) {
                    if AssetType::from_path(&path).is_some() {
                        let critical = looks_critical(&path);
                        out.push(path, critical, Vec::new());
                    }
                }
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            Value::Object(map) => stack.extend(map.values().rev()),
            _ => {}
        }
    }
}

/// Filename heuristic for scripts and styles without manifest metadata.
fn looks_critical(path: &str) -> bool {
    if !matches!(AssetType::from_path(path), Some(AssetType::Css | AssetType::Js)) {
        return false;
    }
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    CRITICAL_HINTS.iter().any(|hint| name.contains(hint))
}

/// Normalizes a manifest path to one relative to the project root.
/// URLs and paths escaping the project are dropped.
fn clean_path(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains("://") || raw.starts_with("//") || raw.starts_with("data:") {
        return None;
    }
    let raw = raw.split(['?', '#']).next().unwrap_or(raw);

    let segments: Vec<&str> = raw
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() || segments.contains(&"..") {
        return None;
    }
    Some(format!("{base}{}", segments.join("/")))
}

/// Finds the on-disk file for a manifest path. Paths carrying a public URL
/// prefix (`/app/static/js/main.js`) are retried with leading segments removed.
fn resolve_existing(project_dir: &Path, path: &str) -> Option<(String, fs::Metadata)> {
    let mut rest = path;
    loop {
        if let Ok(metadata) = fs::symlink_metadata(project_dir.join(rest)) {
            if metadata.is_file() {
                return Some((rest.to_string(), metadata));
            }
        }
        rest = rest.split_once('/')?.1;
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn build_records(project_dir: &Path, candidates: Candidates) -> Result<Vec<AssetRecord>> {
    let mut resolved: Vec<(Candidate, AssetType, fs::Metadata)> = Vec::new();
    let mut renamed: HashMap<String, String> = HashMap::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for mut candidate in candidates.items {
        if candidate.path == ACCESS_FILE || candidate.path == REPORT_FILE {
            continue;
        }
        let Some(asset_type) = AssetType::from_path(&candidate.path) else {
            continue;
        };
        let Some((path, metadata)) = resolve_existing(project_dir, &candidate.path) else {
            debug!(path = %candidate.path, "Manifest entry not on disk, skipping");
            continue;
        };
        if path != candidate.path {
            renamed.insert(candidate.path.clone(), path.clone());
        }
        if let Some(&i) = seen.get(&path) {
            let existing: &mut Candidate = &mut resolved[i].0;
            existing.critical |= candidate.critical;
            existing.dependencies.append(&mut candidate.dependencies);
            continue;
        }
        candidate.path = path.clone();
        seen.insert(path, resolved.len());
        resolved.push((candidate, asset_type, metadata));
    }

    // Critical first, then css < js < html < other; the sort is stable so
    // discovery order breaks ties.
    resolved.sort_by_key(|(c, t, _)| (!c.critical, *t));

    let mut records = Vec::with_capacity(resolved.len());
    for (order, (candidate, asset_type, metadata)) in resolved.iter().enumerate() {
        let mut dependencies = Vec::new();
        for dep in &candidate.dependencies {
            let dep = renamed.get(dep).unwrap_or(dep);
            if dep != &candidate.path && seen.contains_key(dep) && !dependencies.contains(dep) {
                dependencies.push(dep.clone());
            }
        }

        let content_hash = hash_file(&project_dir.join(&candidate.path))
            .map_err(|e| Error::fs(Phase::Parse, e))?;

        records.push(AssetRecord {
            id: String::new(),
            project_id: String::new(),
            relative_path: candidate.path.clone(),
            asset_type: *asset_type,
            size_bytes: metadata.len() as i64,
            content_hash,
            declared_dependencies: dependencies,
            load_order: order as i64,
            is_critical: candidate.critical,
        });
    }
    Ok(records)
}
