//! The embedding tag: `[spadock slug="app" loading="lazy" ...]` in a page
//! template, or the same options as query parameters on the render endpoint.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::planner::{LoadPlan, LoadStrategy, LoadingMode, PlannedAsset};
use crate::types::{LifecycleStatus, Project};

const DIRECTIVE_NAME: &str = "spadock";

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\s*spadock\b(?P<attrs>.*?)/?\]$").expect("directive regex is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>[A-Za-z_][A-Za-z0-9_-]*)(?:\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^\s"']+)))?"#)
        .expect("attribute regex is valid")
});

static DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d+)?(px|%|em|rem|vh|vw)?$").expect("dimension regex is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagOptions {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    pub loading: LoadingMode,
    /// Markup shown until the app mounts, and instead of it on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub responsive: bool,
    pub error_boundary: bool,
    /// Honored only for privileged viewers.
    pub debug: bool,
}

impl TagOptions {
    /// Parses the template directive form. The fallback is trusted markup.
    pub fn parse_directive(directive: &str) -> Result<Self, String> {
        let directive = directive.trim();
        let caps = DIRECTIVE
            .captures(directive)
            .ok_or_else(|| format!("not a [{DIRECTIVE_NAME} ...] directive"))?;
        let attrs = caps.name("attrs").map_or("", |m| m.as_str());

        let pairs = ATTRIBUTE.captures_iter(attrs).map(|c| {
            let value = c
                .name("dq")
                .or_else(|| c.name("sq"))
                .or_else(|| c.name("bare"))
                .map_or("", |m| m.as_str());
            (c["key"].to_string(), value.to_string())
        });
        Self::from_pairs(pairs)
    }

    /// Builds options from request query parameters. The fallback comes from
    /// an untrusted source and is rendered as text.
    pub fn from_query<I>(params: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut options = Self::from_pairs(params)?;
        options.fallback = options.fallback.map(|f| escape_html(&f));
        Ok(options)
    }

    fn from_pairs<I>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            match key.replace('-', "_").as_str() {
                "slug" => options.slug = value,
                "class" => options.class = non_empty(value),
                "style" => options.style = non_empty(value),
                "width" => options.width = Some(dimension(&key, value)?),
                "height" => options.height = Some(dimension(&key, value)?),
                "loading" => options.loading = value.parse()?,
                "fallback" => options.fallback = non_empty(value),
                "props" => options.props = Some(json_blob(&key, &value)?),
                "config" => options.config = Some(json_blob(&key, &value)?),
                "theme" => options.theme = non_empty(value),
                "responsive" => options.responsive = flag(&value),
                "error_boundary" => options.error_boundary = flag(&value),
                "debug" => options.debug = flag(&value),
                _ => warn!(key, "Ignoring unknown tag option"),
            }
        }
        if options.slug.is_empty() {
            return Err("slug is required".to_string());
        }
        Ok(options)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "1" | "true" | "yes" | "on"
    )
}

fn dimension(key: &str, value: String) -> Result<String, String> {
    let value = value.trim();
    if !DIMENSION.is_match(value) {
        return Err(format!("invalid {key} '{value}'"));
    }
    if value.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        Ok(format!("{value}px"))
    } else {
        Ok(value.to_string())
    }
}

fn json_blob(key: &str, value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|e| format!("{key} is not valid JSON: {e}"))
}

/// Result of rendering one tag. `head` belongs in the document head, `footer`
/// before the closing body tag, `markup` where the tag stood.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    pub markup: String,
    pub head: String,
    pub footer: String,
}

impl RenderOutput {
    /// Head, markup and footer joined, for standalone responses.
    #[must_use]
    pub fn to_fragment(&self) -> String {
        [&self.head, &self.markup, &self.footer]
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn notice(message: &str) -> Self {
        Self {
            markup: format!(
                "<div class=\"spadock-notice\" role=\"status\">{}</div>",
                escape_html(message)
            ),
            ..Self::default()
        }
    }
}

/// What the renderer knows about the viewer and the project.
pub struct RenderContext<'a> {
    pub options: &'a TagOptions,
    pub project: Option<&'a Project>,
    pub plan: Option<&'a LoadPlan>,
    /// Directory holding the project's extracted files, for inline assets.
    pub project_dir: Option<&'a Path>,
    /// Admins and the owning tenant see notices and debug output.
    pub privileged: bool,
}

/// Renders tags against load plans.
pub struct TagRenderer;

impl TagRenderer {
    /// Missing and inactive projects render nothing to ordinary viewers and a
    /// notice to privileged ones.
    pub fn render(ctx: &RenderContext<'_>) -> RenderOutput {
        let slug = &ctx.options.slug;
        let Some(project) = ctx.project else {
            return if ctx.privileged {
                RenderOutput::notice(&format!("Project '{slug}' not found"))
            } else {
                RenderOutput::default()
            };
        };

        if project.status != LifecycleStatus::Active {
            let state = match project.status {
                LifecycleStatus::Error => "is in an error state",
                _ => "is deactivated",
            };
            return if ctx.privileged {
                RenderOutput::notice(&format!("Project '{slug}' {state}"))
            } else {
                RenderOutput::default()
            };
        }

        let Some(plan) = ctx.plan else {
            return if ctx.privileged {
                RenderOutput::notice(&format!("Project '{slug}' has no loadable assets"))
            } else {
                RenderOutput::default()
            };
        };

        let plan = plan.clone().with_loading(ctx.options.loading);
        let container_id = container_id(slug);
        let mut output = RenderOutput {
            markup: container_markup(&container_id, project, ctx.options),
            head: String::new(),
            footer: String::new(),
        };

        for asset in &plan.critical_css {
            match asset.strategy {
                LoadStrategy::Inline => match read_inline(ctx.project_dir, asset) {
                    Some(css) => {
                        let _ = writeln!(
                            output.head,
                            "<style data-spadock=\"{}\">{}</style>",
                            escape_attr(slug),
                            css.replace("</style", "<\\/style")
                        );
                    }
                    None => push_stylesheet(&mut output.head, &asset.url),
                },
                _ => {
                    let _ = writeln!(
                        output.head,
                        "<link rel=\"preload\" as=\"style\" href=\"{}\">",
                        escape_attr(&asset.url)
                    );
                    push_stylesheet(&mut output.head, &asset.url);
                }
            }
        }

        for asset in &plan.critical_js {
            if asset.strategy == LoadStrategy::Preload {
                let _ = writeln!(
                    output.head,
                    "<link rel=\"preload\" as=\"script\" href=\"{}\">",
                    escape_attr(&asset.url)
                );
            }
        }

        for asset in &plan.deferred_css {
            match asset.strategy {
                LoadStrategy::Lazy => lazy_assets(&mut output.footer, &container_id, asset),
                LoadStrategy::Preload => push_stylesheet(&mut output.head, &asset.url),
                _ => {
                    let _ = writeln!(
                        output.head,
                        "<link rel=\"stylesheet\" href=\"{}\" media=\"print\" onload=\"this.media='all'\">",
                        escape_attr(&asset.url)
                    );
                }
            }
        }

        for asset in &plan.critical_js {
            let inline = (asset.strategy == LoadStrategy::Inline)
                .then(|| read_inline(ctx.project_dir, asset))
                .flatten();
            match inline {
                Some(js) => {
                    let _ = writeln!(
                        output.footer,
                        "<script>{}</script>",
                        js.replace("</script", "<\\/script")
                    );
                }
                None => {
                    let _ = writeln!(
                        output.footer,
                        "<script src=\"{}\"></script>",
                        escape_attr(&asset.url)
                    );
                }
            }
        }

        for asset in &plan.deferred_js {
            match asset.strategy {
                LoadStrategy::Lazy => lazy_assets(&mut output.footer, &container_id, asset),
                _ => {
                    let _ = writeln!(
                        output.footer,
                        "<script src=\"{}\" defer></script>",
                        escape_attr(&asset.url)
                    );
                }
            }
        }

        if ctx.options.error_boundary {
            let _ = writeln!(
                output.footer,
                "<script>window.addEventListener('error',function(e){{var c=document.getElementById('{container_id}');if(c&&c.dataset.fallback!==undefined&&e.filename&&e.filename.indexOf('/{slug}/')!==-1){{c.innerHTML=c.dataset.fallback;}}}});</script>",
                slug = escape_js(slug),
            );
        }

        if ctx.options.debug && ctx.privileged {
            let debug = serde_json::json!({
                "container": container_id,
                "project_id": project.id,
                "content_version": project.content_version,
                "options": ctx.options,
                "plan": plan,
            });
            let _ = writeln!(
                output.footer,
                "<script type=\"application/json\" class=\"spadock-debug\">{}</script>",
                debug.to_string().replace("</", "<\\/")
            );
        }

        output.head = output.head.trim_end().to_string();
        output.footer = output.footer.trim_end().to_string();
        output
    }
}

/// Unique per render call, so one page can embed the same app twice.
fn container_id(slug: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("spadock-{slug}-{}", &simple[..8])
}

fn container_markup(id: &str, project: &Project, options: &TagOptions) -> String {
    let mut classes = vec!["spadock-app".to_string()];
    if options.responsive {
        classes.push("spadock-responsive".to_string());
    }
    if let Some(theme) = &options.theme {
        classes.push(format!("spadock-theme-{theme}"));
    }
    if let Some(class) = &options.class {
        classes.push(class.clone());
    }

    let mut style = String::new();
    if let Some(width) = &options.width {
        let _ = write!(style, "width:{width};");
    }
    if let Some(height) = &options.height {
        let _ = write!(style, "height:{height};");
    }
    if let Some(extra) = &options.style {
        style.push_str(extra);
    }

    let mut markup = format!(
        "<div id=\"{}\" class=\"{}\" data-spadock-slug=\"{}\" data-spadock-version=\"{}\"",
        escape_attr(id),
        escape_attr(&classes.join(" ")),
        escape_attr(&project.slug),
        escape_attr(&project.content_version),
    );
    if !style.is_empty() {
        let _ = write!(markup, " style=\"{}\"", escape_attr(&style));
    }
    if let Some(theme) = &options.theme {
        let _ = write!(markup, " data-theme=\"{}\"", escape_attr(theme));
    }
    if let Some(props) = &options.props {
        let _ = write!(markup, " data-props=\"{}\"", escape_attr(&props.to_string()));
    }
    if let Some(config) = &options.config {
        let _ = write!(markup, " data-config=\"{}\"", escape_attr(&config.to_string()));
    }
    if options.error_boundary {
        let fallback = options.fallback.as_deref().unwrap_or_default();
        let _ = write!(markup, " data-fallback=\"{}\"", escape_attr(fallback));
    }
    markup.push('>');
    if let Some(fallback) = &options.fallback {
        markup.push_str(fallback);
    }
    markup.push_str("</div>");
    markup
}

fn push_stylesheet(out: &mut String, url: &str) {
    let _ = writeln!(out, "<link rel=\"stylesheet\" href=\"{}\">", escape_attr(url));
}

/// Loads an asset once the container scrolls into view.
fn lazy_assets(out: &mut String, container_id: &str, asset: &PlannedAsset) {
    let (tag, attr, extra) = match asset.asset_type {
        crate::types::AssetType::Css => ("link", "href", "l.rel='stylesheet';"),
        _ => ("script", "src", ""),
    };
    let _ = writeln!(
        out,
        "<script>(function(){{var c=document.getElementById('{id}');var load=function(){{var l=document.createElement('{tag}');{extra}l.{attr}='{url}';document.head.appendChild(l);}};if(!c||!('IntersectionObserver' in window)){{load();return;}}var o=new IntersectionObserver(function(es){{if(es.some(function(e){{return e.isIntersecting;}})){{o.disconnect();load();}}}});o.observe(c);}})();</script>",
        id = escape_js(container_id),
        url = escape_js(&asset.url),
    );
}

fn read_inline(project_dir: Option<&Path>, asset: &PlannedAsset) -> Option<String> {
    let path: PathBuf = project_dir?.join(&asset.path);
    match fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!(path = %path.display(), "Cannot inline asset, linking instead: {e}");
            None
        }
    }
}

#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    escape_html(s)
}

fn escape_js(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '<' => out.push_str("\\x3c"),
            '>' => out.push_str("\\x3e"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetType;
    use chrono::Utc;
    use tempfile::TempDir;

    fn project(status: LifecycleStatus) -> Project {
        Project {
            id: "p1".into(),
            tenant_id: "t1".into(),
            slug: "demo".into(),
            display_name: "Demo".into(),
            description: None,
            storage_path: "projects/default/demo".into(),
            content_size_bytes: 10,
            content_version: "abcdef0123456789".into(),
            status,
            settings: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn asset(path: &str, asset_type: AssetType, strategy: LoadStrategy) -> PlannedAsset {
        PlannedAsset {
            path: path.into(),
            asset_type,
            url: format!("https://apps.example.com/assets/default/demo/{path}?v=1"),
            strategy,
            size_bytes: 10,
            content_hash: "h".into(),
            dependencies: Vec::new(),
        }
    }

    fn plan() -> LoadPlan {
        LoadPlan {
            project_id: "p1".into(),
            slug: "demo".into(),
            content_version: "abcdef0123456789".into(),
            critical_css: vec![asset("main.css", AssetType::Css, LoadStrategy::Inline)],
            deferred_css: vec![asset("late.css", AssetType::Css, LoadStrategy::Defer)],
            critical_js: vec![asset("main.js", AssetType::Js, LoadStrategy::Preload)],
            deferred_js: vec![asset("chunk.js", AssetType::Js, LoadStrategy::Defer)],
        }
    }

    fn options() -> TagOptions {
        TagOptions {
            slug: "demo".into(),
            ..TagOptions::default()
        }
    }

    #[test]
    fn test_parse_directive() {
        let options = TagOptions::parse_directive(
            r#"[spadock slug="demo" loading='lazy' width=640 height="50%" theme=dark responsive props='{"user":1}' error-boundary="false"]"#,
        )
        .unwrap();

        assert_eq!(options.slug, "demo");
        assert_eq!(options.loading, LoadingMode::Lazy);
        assert_eq!(options.width.as_deref(), Some("640px"));
        assert_eq!(options.height.as_deref(), Some("50%"));
        assert_eq!(options.theme.as_deref(), Some("dark"));
        assert_eq!(options.props, Some(serde_json::json!({"user": 1})));
        assert!(options.responsive);
        assert!(!options.error_boundary);
    }

    #[test]
    fn test_parse_directive_errors() {
        assert!(TagOptions::parse_directive("[other slug=demo]").is_err());
        assert!(TagOptions::parse_directive("[spadock loading=lazy]").is_err());
        assert!(TagOptions::parse_directive("[spadock slug=demo loading=soon]").is_err());
        assert!(TagOptions::parse_directive("[spadock slug=demo props='{bad']").is_err());
        assert!(TagOptions::parse_directive("[spadock slug=demo width=\"1;x\"]").is_err());
    }

    #[test]
    fn test_query_fallback_is_escaped() {
        let options = TagOptions::from_query([
            ("slug".to_string(), "demo".to_string()),
            ("fallback".to_string(), "<b>loading</b>".to_string()),
        ])
        .unwrap();
        assert_eq!(options.fallback.as_deref(), Some("&lt;b&gt;loading&lt;/b&gt;"));
    }

    #[test]
    fn test_container_ids_are_unique_per_render() {
        let project = project(LifecycleStatus::Active);
        let plan = plan();
        let opts = options();
        let ctx = RenderContext {
            options: &opts,
            project: Some(&project),
            plan: Some(&plan),
            project_dir: None,
            privileged: false,
        };
        let a = TagRenderer::render(&ctx);
        let b = TagRenderer::render(&ctx);
        assert!(a.markup.starts_with("<div id=\"spadock-demo-"));
        assert_ne!(a.markup, b.markup);
    }

    #[test]
    fn test_asset_tags_follow_plan() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("main.css"), "body{color:red}").unwrap();

        let project = project(LifecycleStatus::Active);
        let plan = plan();
        let opts = options();
        let out = TagRenderer::render(&RenderContext {
            options: &opts,
            project: Some(&project),
            plan: Some(&plan),
            project_dir: Some(temp.path()),
            privileged: false,
        });

        assert!(out.head.contains("<style data-spadock=\"demo\">body{color:red}</style>"));
        assert!(out.head.contains("rel=\"preload\" as=\"script\""));
        assert!(out.head.contains("late.css?v=1\" media=\"print\""));
        let main = out.footer.find("main.js").unwrap();
        let chunk = out.footer.find("chunk.js").unwrap();
        assert!(main < chunk);
        assert!(out.footer.contains("chunk.js?v=1\" defer"));
    }

    #[test]
    fn test_missing_inline_source_falls_back_to_link() {
        let project = project(LifecycleStatus::Active);
        let plan = plan();
        let opts = options();
        let out = TagRenderer::render(&RenderContext {
            options: &opts,
            project: Some(&project),
            plan: Some(&plan),
            project_dir: None,
            privileged: false,
        });
        assert!(out.head.contains("<link rel=\"stylesheet\" href=\"https://apps.example.com/assets/default/demo/main.css?v=1\">"));
    }

    #[test]
    fn test_inactive_project_visibility() {
        let project = project(LifecycleStatus::Inactive);
        let opts = options();
        let mut ctx = RenderContext {
            options: &opts,
            project: Some(&project),
            plan: None,
            project_dir: None,
            privileged: false,
        };
        assert_eq!(TagRenderer::render(&ctx), RenderOutput::default());

        ctx.privileged = true;
        let out = TagRenderer::render(&ctx);
        assert!(out.markup.contains("is deactivated"));
    }

    #[test]
    fn test_debug_requires_privilege() {
        let project = project(LifecycleStatus::Active);
        let plan = plan();
        let opts = TagOptions {
            debug: true,
            ..options()
        };
        let mut ctx = RenderContext {
            options: &opts,
            project: Some(&project),
            plan: Some(&plan),
            project_dir: None,
            privileged: false,
        };
        assert!(!TagRenderer::render(&ctx).footer.contains("spadock-debug"));

        ctx.privileged = true;
        assert!(TagRenderer::render(&ctx).footer.contains("spadock-debug"));
    }

    #[test]
    fn test_lazy_loading_uses_observer() {
        let project = project(LifecycleStatus::Active);
        let plan = plan();
        let opts = TagOptions {
            loading: LoadingMode::Lazy,
            ..options()
        };
        let out = TagRenderer::render(&RenderContext {
            options: &opts,
            project: Some(&project),
            plan: Some(&plan),
            project_dir: None,
            privileged: false,
        });
        assert!(out.footer.contains("IntersectionObserver"));
        assert!(!out.footer.contains("chunk.js?v=1\" defer"));
    }
}
