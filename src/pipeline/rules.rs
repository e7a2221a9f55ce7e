//! Checks shared by the scanner and the extractor. Both call these
//! independently so an extraction never relies on an earlier scan verdict.

use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::types::AssetType;

/// Server-executable or server-configuring extensions. Client JS is not here.
const DANGEROUS_EXTENSIONS: &[&str] = &[
    "php", "php3", "php4", "php5", "php7", "php8", "phtml", "pht", "phps", "phar", "asp", "aspx",
    "ashx", "asmx", "jsp", "jspx", "cgi", "pl", "py", "rb", "sh", "bash", "zsh", "ksh", "exe",
    "dll", "so", "dylib", "bat", "cmd", "com", "msi", "ps1", "vbs", "vbe", "wsf", "scr", "jar",
    "war",
];

/// Server configuration files that must never land in a web root.
const DANGEROUS_FILENAMES: &[&str] = &[
    ".htaccess",
    ".htpasswd",
    ".user.ini",
    "php.ini",
    "web.config",
];

/// Inner extensions that some servers still execute (`shell.php.jpg`).
const DANGEROUS_INNER_EXTENSIONS: &[&str] = &["php", "php5", "phtml", "phar", "asp", "aspx", "jsp"];

const TEXT_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "css", "html", "htm", "json", "svg", "xml", "txt", "webmanifest",
];

static SUSPICIOUS_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("php open tag", r"<\?php"),
        ("php short echo tag", r"<\?=\s*\$"),
        ("server-side include", r"<!--#\s*(exec|include)\b"),
        ("shell execution call", r"\b(shell_exec|passthru|proc_open|popen)\s*\("),
        (
            "eval of decoded payload",
            r"\beval\s*\(\s*(atob|unescape|base64_decode|gzinflate|str_rot13)\s*\(",
        ),
        ("function constructor on decoded payload", r"new\s+Function\s*\(\s*atob\s*\("),
        (
            "cookie exfiltration",
            r"document\.cookie[^;\n]{0,200}(fetch|XMLHttpRequest|sendBeacon|new\s+Image)",
        ),
        (
            "credential exfiltration",
            r"(?i)password[^;\n]{0,120}navigator\.sendBeacon",
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid suspicious pattern")))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathIssue {
    Empty,
    NulByte,
    Absolute,
    DriveLetter,
    ParentSegment,
    TooDeep { depth: usize, max: usize },
}

impl std::fmt::Display for PathIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty entry name"),
            Self::NulByte => f.write_str("NUL byte in entry name"),
            Self::Absolute => f.write_str("absolute path"),
            Self::DriveLetter => f.write_str("drive letter in path"),
            Self::ParentSegment => f.write_str("path traversal segment"),
            Self::TooDeep { depth, max } => write!(f, "path depth {depth} exceeds {max}"),
        }
    }
}

/// Normalizes an archive entry name and returns its segments.
///
/// Backslashes count as separators, empty and `.` segments are dropped.
pub fn check_entry_path(name: &str, max_depth: usize) -> Result<Vec<String>, PathIssue> {
    if name.contains('\0') {
        return Err(PathIssue::NulByte);
    }

    let normalized = name.replace('\\', "/");
    if normalized.trim().is_empty() {
        return Err(PathIssue::Empty);
    }
    if normalized.starts_with('/') {
        return Err(PathIssue::Absolute);
    }

    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(PathIssue::DriveLetter);
    }

    let segments: Vec<String> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect();

    if segments.is_empty() {
        return Err(PathIssue::Empty);
    }
    if segments.iter().any(|s| s == "..") {
        return Err(PathIssue::ParentSegment);
    }
    if segments.len() > max_depth {
        return Err(PathIssue::TooDeep {
            depth: segments.len(),
            max: max_depth,
        });
    }

    Ok(segments)
}

/// Lowercased final extension of a file name, if any.
#[must_use]
pub fn extension_of(file_name: &str) -> Option<String> {
    let name = file_name.rsplit('/').next().unwrap_or(file_name);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() && !name[1..].contains('.') {
        // Dotfiles like `.env` have no extension.
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Returns the offending extension or file name when `file_name` is server-executable.
#[must_use]
pub fn dangerous_extension(file_name: &str) -> Option<String> {
    let name = file_name
        .rsplit('/')
        .next()
        .unwrap_or(file_name)
        .to_ascii_lowercase();

    if DANGEROUS_FILENAMES.contains(&name.as_str()) {
        return Some(name);
    }

    let mut parts = name.split('.').skip(1).collect::<Vec<_>>();
    let last = parts.pop()?;
    if DANGEROUS_EXTENSIONS.contains(&last) {
        return Some(last.to_string());
    }

    parts
        .into_iter()
        .find(|inner| DANGEROUS_INNER_EXTENSIONS.contains(inner))
        .map(str::to_string)
}

#[must_use]
pub fn is_text_like(file_name: &str) -> bool {
    extension_of(file_name).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

/// True when the extension is part of the static asset set served to browsers.
#[must_use]
pub fn is_static_asset(file_name: &str) -> bool {
    extension_of(file_name).is_some_and(|ext| AssetType::from_extension(&ext).is_some())
}

/// Static extensions, used to build the access-control file.
#[must_use]
pub fn static_extensions() -> &'static [&'static str] {
    &[
        "js", "mjs", "cjs", "css", "html", "htm", "json", "map", "svg", "png", "jpg", "jpeg",
        "gif", "webp", "avif", "ico", "bmp", "woff", "woff2", "ttf", "otf", "eot", "wasm", "txt",
        "xml", "webmanifest", "mp3", "mp4", "webm", "ogg", "wav",
    ]
}

#[must_use]
pub fn dangerous_extensions() -> &'static [&'static str] {
    DANGEROUS_EXTENSIONS
}

/// Name of the first suspicious pattern found in `content`.
#[must_use]
pub fn find_suspicious_pattern(content: &[u8]) -> Option<&'static str> {
    SUSPICIOUS_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(content))
        .map(|(name, _)| *name)
}

/// Replaces characters outside a conservative set with `_`.
/// Returns `None` when nothing usable is left.
#[must_use]
pub fn sanitize_segment(segment: &str) -> Option<String> {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@' | '+' | '~' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned)
}
