use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;
use zip::ZipArchive;

use super::rules::{check_entry_path, dangerous_extension, find_suspicious_pattern, is_text_like};
use crate::config::Settings;

/// Bytes of each text entry inspected for suspicious patterns.
const CONTENT_SCAN_LIMIT: u64 = 8 * 1024 * 1024;
/// Entries smaller than this are exempt from the compression-ratio check.
const RATIO_CHECK_MIN_SIZE: u64 = 1024 * 1024;
const MAX_VIOLATIONS: usize = 50;
const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    CorruptArchive,
    TooManyFiles,
    TotalSizeExceeded,
    FileTooLarge,
    CompressionRatio,
    UnsafePath,
    DangerousExtension,
    SymbolicLink,
    SuspiciousContent,
    Malware,
}

/// Hard violations always fail a scan; soft ones only when blocking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub message: String,
}

impl Violation {
    pub(crate) fn hard(kind: ViolationKind, entry: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Hard,
            entry: entry.map(str::to_string),
            message: message.into(),
        }
    }

    fn soft(kind: ViolationKind, entry: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Soft,
            entry: Some(entry.to_string()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub ok: bool,
    pub violations: Vec<Violation>,
    pub file_count: usize,
    pub total_uncompressed: u64,
}

impl ScanResult {
    /// Violations that caused the scan to fail, hard ones first.
    #[must_use]
    pub fn blocking(&self, block_suspicious: bool) -> Vec<Violation> {
        let mut blocking: Vec<Violation> = self
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Hard || block_suspicious)
            .cloned()
            .collect();
        blocking.sort_by_key(|v| v.severity != Severity::Hard);
        blocking
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveSecurityScanner {
    max_file_count: usize,
    max_total_uncompressed: u64,
    max_file_bytes: u64,
    max_path_depth: usize,
    max_compression_ratio: u64,
    block_suspicious: bool,
}

impl ArchiveSecurityScanner {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            max_file_count: settings.max_file_count,
            max_total_uncompressed: settings.max_total_uncompressed_bytes,
            max_file_bytes: settings.max_file_bytes,
            max_path_depth: settings.max_path_depth,
            max_compression_ratio: settings.max_compression_ratio,
            block_suspicious: settings.block_suspicious_files,
        }
    }

    /// Validates an archive without writing anything.
    #[must_use]
    pub fn scan(&self, archive_path: &Path) -> ScanResult {
        let mut violations = Vec::new();
        let (file_count, total_uncompressed) = self.scan_entries(archive_path, &mut violations);

        if file_count > self.max_file_count {
            violations.push(Violation::hard(
                ViolationKind::TooManyFiles,
                None,
                format!(
                    "Archive contains {file_count} files, the limit is {}",
                    self.max_file_count
                ),
            ));
        }
        if total_uncompressed > self.max_total_uncompressed {
            violations.push(Violation::hard(
                ViolationKind::TotalSizeExceeded,
                None,
                format!(
                    "Archive expands to {total_uncompressed} bytes, the limit is {}",
                    self.max_total_uncompressed
                ),
            ));
        }

        let ok = !violations
            .iter()
            .any(|v| v.severity == Severity::Hard || self.block_suspicious);

        ScanResult {
            ok,
            violations,
            file_count,
            total_uncompressed,
        }
    }

    fn scan_entries(&self, archive_path: &Path, violations: &mut Vec<Violation>) -> (usize, u64) {
        let mut archive = match File::open(archive_path)
            .map_err(|e| e.to_string())
            .and_then(|f| ZipArchive::new(BufReader::new(f)).map_err(|e| e.to_string()))
        {
            Ok(archive) => archive,
            Err(e) => {
                record(
                    violations,
                    Violation::hard(
                        ViolationKind::CorruptArchive,
                        None,
                        format!("Archive could not be opened: {e}"),
                    ),
                );
                return (0, 0);
            }
        };

        let mut file_count = 0usize;
        let mut total = 0u64;

        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    record(
                        violations,
                        Violation::hard(
                            ViolationKind::CorruptArchive,
                            None,
                            format!("Entry {index} is unreadable: {e}"),
                        ),
                    );
                    break;
                }
            };

            let name = entry.name().to_string();

            if let Err(issue) = check_entry_path(&name, self.max_path_depth) {
                record(
                    violations,
                    Violation::hard(
                        ViolationKind::UnsafePath,
                        Some(&name),
                        format!("Unsafe entry path '{name}': {issue}"),
                    ),
                );
                continue;
            }

            if entry.is_dir() {
                continue;
            }

            if entry
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                record(
                    violations,
                    Violation::hard(
                        ViolationKind::SymbolicLink,
                        Some(&name),
                        format!("Symbolic link entries are not allowed: '{name}'"),
                    ),
                );
                continue;
            }

            if let Some(ext) = dangerous_extension(&name) {
                record(
                    violations,
                    Violation::hard(
                        ViolationKind::DangerousExtension,
                        Some(&name),
                        format!("File type '{ext}' is not allowed: '{name}'"),
                    ),
                );
                continue;
            }

            let size = entry.size();
            file_count += 1;
            total = total.saturating_add(size);

            if size > self.max_file_bytes {
                record(
                    violations,
                    Violation::hard(
                        ViolationKind::FileTooLarge,
                        Some(&name),
                        format!(
                            "'{name}' is {size} bytes, the per-file limit is {}",
                            self.max_file_bytes
                        ),
                    ),
                );
                continue;
            }

            let compressed = entry.compressed_size();
            if size >= RATIO_CHECK_MIN_SIZE
                && compressed > 0
                && size / compressed > self.max_compression_ratio
            {
                record(
                    violations,
                    Violation::hard(
                        ViolationKind::CompressionRatio,
                        Some(&name),
                        format!(
                            "'{name}' has a suspicious compression ratio ({}:1)",
                            size / compressed
                        ),
                    ),
                );
                continue;
            }

            // Past the cap another soft hit cannot change the verdict.
            if is_text_like(&name) && violations.len() < MAX_VIOLATIONS {
                let mut content = Vec::new();
                if let Err(e) = (&mut entry)
                    .take(CONTENT_SCAN_LIMIT)
                    .read_to_end(&mut content)
                {
                    record(
                        violations,
                        Violation::hard(
                            ViolationKind::CorruptArchive,
                            Some(&name),
                            format!("'{name}' could not be decompressed: {e}"),
                        ),
                    );
                    continue;
                }
                if let Some(pattern) = find_suspicious_pattern(&content) {
                    record(
                        violations,
                        Violation::soft(
                            ViolationKind::SuspiciousContent,
                            &name,
                            format!("'{name}' contains a suspicious pattern ({pattern})"),
                        ),
                    );
                }
            }
        }

        (file_count, total)
    }
}

/// Keeps the report bounded while every entry is still walked and counted.
/// A hard violation is always kept if none has been recorded yet.
fn record(violations: &mut Vec<Violation>, violation: Violation) {
    let first_hard = violation.severity == Severity::Hard
        && !violations.iter().any(|v| v.severity == Severity::Hard);
    if violations.len() < MAX_VIOLATIONS || first_hard {
        violations.push(violation);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use tempfile::TempDir;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn build_zip(dir: &Path, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
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

    fn kinds(result: &ScanResult) -> Vec<ViolationKind> {
        result.violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_clean_archive_passes() {
        let temp = TempDir::new().unwrap();
        let path = build_zip(
            temp.path(),
            &[
                ("index.html", b"<html><body><div id=root></div></body></html>"),
                ("static/js/main.abc123.js", b"console.log('hi')"),
                ("static/css/main.css", b"body{margin:0}"),
            ],
        );

        let result = ArchiveSecurityScanner::new(&Settings::default()).scan(&path);
        assert!(result.ok, "{:?}", result.violations);
        assert_eq!(result.file_count, 3);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_corrupt_archive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let result = ArchiveSecurityScanner::new(&Settings::default()).scan(&path);
        assert!(!result.ok);
        assert_eq!(kinds(&result), vec![ViolationKind::CorruptArchive]);
    }

    #[test]
    fn test_path_traversal_is_hard_violation() {
        let temp = TempDir::new().unwrap();
        let path = build_zip(
            temp.path(),
            &[("index.html", b"<html></html>"), ("../../etc/passwd", b"root:x")],
        );

        let mut settings = Settings::default();
        settings.block_suspicious_files = false;
        let result = ArchiveSecurityScanner::new(&settings).scan(&path);

        assert!(!result.ok);
        assert_eq!(kinds(&result), vec![ViolationKind::UnsafePath]);
        assert_eq!(result.violations[0].severity, Severity::Hard);
    }

    #[test]
    fn test_dangerous_extension() {
        let temp = TempDir::new().unwrap();
        let path = build_zip(temp.path(), &[("index.html", b"ok"), ("shell.php", b"x")]);

        let result = ArchiveSecurityScanner::new(&Settings::default()).scan(&path);
        assert!(!result.ok);
        assert_eq!(kinds(&result), vec![ViolationKind::DangerousExtension]);
    }

    #[test]
    fn test_file_count_limit() {
        let temp = TempDir::new().unwrap();
        let path = build_zip(
            temp.path(),
            &[("a.js", b"1"), ("b.js", b"2"), ("c.js", b"3")],
        );

        let mut settings = Settings::default();
        settings.max_file_count = 2;
        let result = ArchiveSecurityScanner::new(&settings).scan(&path);
        assert!(!result.ok);
        assert!(kinds(&result).contains(&ViolationKind::TooManyFiles));
    }

    #[test]
    fn test_total_size_limit_uses_uncompressed_sizes() {
        let temp = TempDir::new().unwrap();
        let big = vec![b'a'; 64 * 1024];
        let path = build_zip(temp.path(), &[("a.js", &big), ("b.js", &big)]);

        let mut settings = Settings::default();
        settings.max_total_uncompressed_bytes = 100 * 1024;
        let result = ArchiveSecurityScanner::new(&settings).scan(&path);

        assert!(!result.ok);
        assert_eq!(result.total_uncompressed, 128 * 1024);
        assert!(kinds(&result).contains(&ViolationKind::TotalSizeExceeded));
    }

    #[test]
    fn test_suspicious_content_is_soft_and_gated() {
        let temp = TempDir::new().unwrap();
        let path = build_zip(
            temp.path(),
            &[("index.html", b"<?php echo 1; ?>"), ("main.js", b"1")],
        );

        let blocking = ArchiveSecurityScanner::new(&Settings::default()).scan(&path);
        assert!(!blocking.ok);
        assert_eq!(blocking.violations[0].severity, Severity::Soft);

        let mut settings = Settings::default();
        settings.block_suspicious_files = false;
        let lenient = ArchiveSecurityScanner::new(&settings).scan(&path);
        assert!(lenient.ok);
        assert_eq!(kinds(&lenient), vec![ViolationKind::SuspiciousContent]);
        assert!(lenient.blocking(false).is_empty());
    }

    #[test]
    fn test_limits_hold_after_violation_cap() {
        let temp = TempDir::new().unwrap();
        let mut entries: Vec<(String, Vec<u8>)> = (0..MAX_VIOLATIONS)
            .map(|i| (format!("s{i}.js"), b"<?php echo 1; ?>".to_vec()))
            .collect();
        entries.extend((0..100).map(|i| (format!("p{i}.js"), b"1".to_vec())));
        entries.push(("late.php".to_string(), b"x".to_vec()));
        let borrowed: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        let path = build_zip(temp.path(), &borrowed);

        let mut settings = Settings::default();
        settings.block_suspicious_files = false;
        settings.max_file_count = 60;
        let result = ArchiveSecurityScanner::new(&settings).scan(&path);

        assert!(!result.ok);
        assert_eq!(result.file_count, MAX_VIOLATIONS + 100);
        let found = kinds(&result);
        assert!(found.contains(&ViolationKind::TooManyFiles));
        assert!(found.contains(&ViolationKind::DangerousExtension));
    }
}
