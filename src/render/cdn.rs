use glob::Pattern;
use tracing::warn;

use crate::config::CdnSettings;
use crate::pipeline::rules::extension_of;

/// Hook applied to every asset URL after it is built.
pub trait CdnRewriter: Send + Sync {
    /// Returns the URL to emit for `relative_path`, possibly unchanged.
    fn rewrite(&self, url: &str, relative_path: &str) -> String;
}

/// Swaps the origin prefix of eligible asset URLs for a CDN base URL.
///
/// A URL is eligible when the asset's extension is in the configured list and
/// the URL matches none of the exclusion globs.
pub struct PrefixCdnRewriter {
    origin: String,
    cdn_base: String,
    extensions: Vec<String>,
    excluded: Vec<Pattern>,
}

impl PrefixCdnRewriter {
    pub fn new(origin: &str, settings: &CdnSettings) -> Self {
        let excluded = settings
            .excluded_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid CDN exclusion '{p}': {e}");
                    None
                }
            })
            .collect();

        Self {
            origin: origin.trim_end_matches('/').to_string(),
            cdn_base: settings.base_url.trim_end_matches('/').to_string(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excluded,
        }
    }

    fn eligible(&self, url: &str, relative_path: &str) -> bool {
        let Some(ext) = extension_of(relative_path) else {
            return false;
        };
        self.extensions.contains(&ext) && !self.excluded.iter().any(|p| p.matches(url))
    }
}

impl CdnRewriter for PrefixCdnRewriter {
    fn rewrite(&self, url: &str, relative_path: &str) -> String {
        if self.cdn_base.is_empty() || !self.eligible(url, relative_path) {
            return url.to_string();
        }
        match url.strip_prefix(&self.origin) {
            Some(rest) if rest.starts_with('/') => format!("{}{rest}", self.cdn_base),
            _ if url.starts_with('/') && !url.starts_with("//") => {
                format!("{}{url}", self.cdn_base)
            }
            _ => url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> PrefixCdnRewriter {
        let settings = CdnSettings {
            enabled: true,
            base_url: "https://cdn.example.net/".into(),
            ..CdnSettings::default()
        };
        PrefixCdnRewriter::new("https://apps.example.com", &settings)
    }

    #[test]
    fn test_rewrites_allowed_extensions() {
        let url = "https://apps.example.com/assets/default/demo/main.js?v=1";
        assert_eq!(
            rewriter().rewrite(url, "main.js"),
            "https://cdn.example.net/assets/default/demo/main.js?v=1"
        );
    }

    #[test]
    fn test_skips_other_extensions() {
        let url = "https://apps.example.com/assets/default/demo/data.json?v=1";
        assert_eq!(rewriter().rewrite(url, "data.json"), url);
    }

    #[test]
    fn test_skips_excluded_urls() {
        let url = "https://apps.example.com/assets/default/demo/admin/panel.js?v=1";
        assert_eq!(rewriter().rewrite(url, "admin/panel.js"), url);

        let url = "https://apps.example.com/assets/default/demo/login.css?v=1";
        assert_eq!(rewriter().rewrite(url, "login.css"), url);
    }

    #[test]
    fn test_foreign_origin_untouched() {
        let url = "https://elsewhere.example.org/main.js";
        assert_eq!(rewriter().rewrite(url, "main.js"), url);
        assert_eq!(
            rewriter().rewrite("/assets/default/demo/a.css", "a.css"),
            "https://cdn.example.net/assets/default/demo/a.css"
        );
    }
}
