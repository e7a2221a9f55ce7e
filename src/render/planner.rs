//! Turns a project's ordered asset catalog into a [`LoadPlan`]: which
//! stylesheets and scripts are inlined, preloaded, deferred or lazy-loaded,
//! and the URL each one is fetched from.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::cdn::{CdnRewriter, PrefixCdnRewriter};
use crate::config::Settings;
use crate::types::{AssetRecord, AssetType, Project};

/// How a single asset reaches the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Embedded in the page; no network request.
    Inline,
    /// Requested early through a preload hint.
    Preload,
    /// Requested after the document is parsed.
    Defer,
    /// Requested once the app container becomes visible.
    Lazy,
}

/// Page-level loading preference chosen by the embedding tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMode {
    #[default]
    Auto,
    Lazy,
    Eager,
}

impl std::str::FromStr for LoadingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "lazy" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            other => Err(format!(
                "invalid loading strategy '{other}' (expected auto, lazy or eager)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAsset {
    pub path: String,
    pub asset_type: AssetType,
    pub url: String,
    pub strategy: LoadStrategy,
    pub size_bytes: i64,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadPlan {
    pub project_id: String,
    pub slug: String,
    pub content_version: String,
    pub critical_css: Vec<PlannedAsset>,
    pub deferred_css: Vec<PlannedAsset>,
    pub critical_js: Vec<PlannedAsset>,
    pub deferred_js: Vec<PlannedAsset>,
}

impl LoadPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.critical_css.is_empty()
            && self.deferred_css.is_empty()
            && self.critical_js.is_empty()
            && self.deferred_js.is_empty()
    }

    /// All planned assets: critical css, critical js, deferred css, deferred js.
    pub fn assets(&self) -> impl Iterator<Item = &PlannedAsset> {
        self.critical_css
            .iter()
            .chain(&self.critical_js)
            .chain(&self.deferred_css)
            .chain(&self.deferred_js)
    }

    /// Applies the embedding tag's loading preference to the non-critical
    /// assets. Critical assets keep their strategy.
    #[must_use]
    pub fn with_loading(mut self, mode: LoadingMode) -> Self {
        let strategy = match mode {
            LoadingMode::Auto => return self,
            LoadingMode::Lazy => LoadStrategy::Lazy,
            LoadingMode::Eager => LoadStrategy::Preload,
        };
        for asset in self.deferred_css.iter_mut().chain(self.deferred_js.iter_mut()) {
            asset.strategy = strategy;
        }
        self
    }
}

pub struct LoadPlanner {
    base_url: String,
    inline_threshold: u64,
    cache_busting: bool,
    cdn: Option<Arc<dyn CdnRewriter>>,
}

impl LoadPlanner {
    /// `base_url` is the public origin assets are served from, e.g.
    /// `https://apps.example.com`. A CDN rewriter is attached when enabled
    /// in `settings`.
    pub fn new(base_url: &str, settings: &Settings) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let cdn = settings.cdn.enabled.then(|| {
            Arc::new(PrefixCdnRewriter::new(&base_url, &settings.cdn)) as Arc<dyn CdnRewriter>
        });
        Self {
            base_url,
            inline_threshold: settings.inline_threshold_bytes,
            cache_busting: settings.cache_busting,
            cdn,
        }
    }

    #[must_use]
    pub fn with_cdn(mut self, cdn: Arc<dyn CdnRewriter>) -> Self {
        self.cdn = Some(cdn);
        self
    }

    /// Builds the plan for `project` from its catalog records, which are
    /// expected in catalog order (critical first, then load order).
    ///
    /// Only css and js are planned. Dependencies of critical assets are
    /// promoted to critical, and each group is ordered so that an asset comes
    /// after everything it depends on.
    pub fn plan(&self, tenant: &str, project: &Project, assets: &[AssetRecord]) -> LoadPlan {
        let planned: Vec<&AssetRecord> = assets
            .iter()
            .filter(|a| matches!(a.asset_type, AssetType::Css | AssetType::Js))
            .collect();

        let critical = promote_dependencies(&planned);

        let mut plan = LoadPlan {
            project_id: project.id.clone(),
            slug: project.slug.clone(),
            content_version: project.content_version.clone(),
            critical_css: Vec::new(),
            deferred_css: Vec::new(),
            critical_js: Vec::new(),
            deferred_js: Vec::new(),
        };

        for record in planned {
            let is_critical = critical.contains(record.relative_path.as_str());
            let strategy = if !is_critical {
                LoadStrategy::Defer
            } else if (record.size_bytes.max(0) as u64) < self.inline_threshold {
                LoadStrategy::Inline
            } else {
                LoadStrategy::Preload
            };
            let asset = PlannedAsset {
                path: record.relative_path.clone(),
                asset_type: record.asset_type,
                url: self.asset_url(tenant, project, record),
                strategy,
                size_bytes: record.size_bytes,
                content_hash: record.content_hash.clone(),
                dependencies: record.declared_dependencies.clone(),
            };
            let group = match (record.asset_type, is_critical) {
                (AssetType::Css, true) => &mut plan.critical_css,
                (AssetType::Css, false) => &mut plan.deferred_css,
                (_, true) => &mut plan.critical_js,
                (_, false) => &mut plan.deferred_js,
            };
            group.push(asset);
        }

        for group in [
            &mut plan.critical_css,
            &mut plan.deferred_css,
            &mut plan.critical_js,
            &mut plan.deferred_js,
        ] {
            let ordered = dependency_order(std::mem::take(group), &project.slug);
            *group = ordered;
        }
        plan
    }

    /// Public URL of one asset, with the cache-busting version parameter and
    /// any CDN rewrite applied.
    pub fn asset_url(&self, tenant: &str, project: &Project, record: &AssetRecord) -> String {
        let encoded_path = record
            .relative_path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let version = if self.cache_busting {
            &record.content_hash
        } else {
            &project.content_version
        };
        let url = format!(
            "{}/assets/{}/{}/{}?v={}",
            self.base_url,
            urlencoding::encode(tenant),
            urlencoding::encode(&project.slug),
            encoded_path,
            urlencoding::encode(version),
        );

        match &self.cdn {
            Some(cdn) => cdn.rewrite(&url, &record.relative_path),
            None => url,
        }
    }
}

/// Paths that must load before first render: critical records plus
/// everything they transitively depend on.
fn promote_dependencies<'a>(records: &[&'a AssetRecord]) -> HashSet<&'a str> {
    let by_path: HashMap<&'a str, &'a AssetRecord> = records
        .iter()
        .copied()
        .map(|r| (r.relative_path.as_str(), r))
        .collect();

    let mut critical = HashSet::new();
    let mut stack: Vec<&'a str> = records
        .iter()
        .copied()
        .filter(|r| r.is_critical)
        .map(|r| r.relative_path.as_str())
        .collect();

    while let Some(path) = stack.pop() {
        if !critical.insert(path) {
            continue;
        }
        let Some(&record) = by_path.get(path) else {
            continue;
        };
        for dep in &record.declared_dependencies {
            if let Some(&dep_record) = by_path.get(dep.as_str()) {
                stack.push(dep_record.relative_path.as_str());
            }
        }
    }
    critical
}

/// Stable topological sort: an asset is emitted after its in-group
/// dependencies, otherwise in its original position. Assets caught in a
/// dependency cycle keep their original relative order.
fn dependency_order(group: Vec<PlannedAsset>, slug: &str) -> Vec<PlannedAsset> {
    if group.len() < 2 {
        return group;
    }

    let index: HashMap<&str, usize> = group
        .iter()
        .enumerate()
        .map(|(i, a)| (a.path.as_str(), i))
        .collect();

    let mut pending = vec![0usize; group.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); group.len()];
    for (i, asset) in group.iter().enumerate() {
        let deps: BTreeSet<usize> = asset
            .dependencies
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .filter(|&d| d != i)
            .collect();
        pending[i] = deps.len();
        for d in deps {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..group.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(group.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &next in &dependents[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < group.len() {
        warn!(slug, "Dependency cycle among assets, keeping catalog order");
        let placed: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..group.len()).filter(|i| !placed.contains(i)));
    }

    let mut slots: Vec<Option<PlannedAsset>> = group.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}
