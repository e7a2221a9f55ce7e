use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use super::walk::walk_files;
use super::{ACCESS_FILE, REPORT_FILE};

const VERSION_LENGTH: usize = 16;
const MAX_WALK_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFingerprint {
    pub version: String,
    pub total_size: u64,
    pub file_count: usize,
}

/// Fingerprints a project directory from each file's relative path, size and
/// modification time. Files written by the pipeline itself are excluded.
pub fn fingerprint(dir: &Path) -> io::Result<ContentFingerprint> {
    let mut hasher = Sha256::new();
    let mut total_size = 0u64;
    let mut file_count = 0usize;

    let mut files = walk_files(dir, MAX_WALK_DEPTH)?;
    files.retain(|f| f.relative != ACCESS_FILE && f.relative != REPORT_FILE);
    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    for file in &files {
        let size = file.metadata.len();
        let mtime = file
            .metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        hasher.update(file.relative.as_bytes());
        hasher.update([0]);
        hasher.update(size.to_le_bytes());
        hasher.update(mtime.to_le_bytes());

        total_size += size;
        file_count += 1;
    }

    let digest = hex::encode(hasher.finalize());
    Ok(ContentFingerprint {
        version: digest[..VERSION_LENGTH].to_string(),
        total_size,
        file_count,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, SystemTime};

    use super::*;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn test_version_stable_without_changes() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.html"), "<html></html>").unwrap();
        fs::write(temp.path().join("main.js"), "console.log(1)").unwrap();

        let a = fingerprint(temp.path()).unwrap();
        let b = fingerprint(temp.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.file_count, 2);
        assert_eq!(a.version.len(), VERSION_LENGTH);
    }

    #[test]
    fn test_version_changes_with_mtime() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("main.js");
        fs::write(&path, "a").unwrap();
        set_mtime(&path, UNIX_EPOCH + Duration::from_secs(1_000_000));
        let before = fingerprint(temp.path()).unwrap();

        set_mtime(&path, UNIX_EPOCH + Duration::from_secs(2_000_000));
        let after = fingerprint(temp.path()).unwrap();

        assert_ne!(before.version, after.version);
        assert_eq!(before.total_size, after.total_size);
    }

    #[test]
    fn test_version_changes_with_size() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("main.js");
        let fixed = UNIX_EPOCH + Duration::from_secs(1_000_000);
        fs::write(&path, "a").unwrap();
        set_mtime(&path, fixed);
        let before = fingerprint(temp.path()).unwrap();

        fs::write(&path, "ab").unwrap();
        set_mtime(&path, fixed);
        let after = fingerprint(temp.path()).unwrap();

        assert_ne!(before.version, after.version);
    }

    #[test]
    fn test_generated_files_are_ignored() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("main.js"), "a").unwrap();
        let before = fingerprint(temp.path()).unwrap();

        fs::write(temp.path().join(ACCESS_FILE), "deny").unwrap();
        fs::write(temp.path().join(REPORT_FILE), "{}").unwrap();
        let after = fingerprint(temp.path()).unwrap();

        assert_eq!(before, after);
    }
}
