//! Worklist directory traversal. Depth is bounded by an explicit check on the
//! pending stack rather than by recursion.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
    pub metadata: Metadata,
}

struct Pending {
    dir: PathBuf,
    prefix: String,
    depth: usize,
}

/// Lists regular files under `root` in a deterministic order: a directory's
/// files (sorted by name) come before its subdirectories, which are visited in
/// name order. Files deeper than `max_depth` path segments are not listed and
/// symbolic links are never followed.
pub fn walk_files(root: &Path, max_depth: usize) -> io::Result<Vec<WalkEntry>> {
    let mut files = Vec::new();
    let mut stack = vec![Pending {
        dir: root.to_path_buf(),
        prefix: String::new(),
        depth: 0,
    }];

    while let Some(pending) = stack.pop() {
        let mut entries = fs::read_dir(&pending.dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = fs::symlink_metadata(entry.path())?;
            let relative = if pending.prefix.is_empty() {
                name
            } else {
                format!("{}/{}", pending.prefix, name)
            };

            if metadata.is_dir() {
                subdirs.push((entry.path(), relative));
            } else if metadata.is_file() && pending.depth < max_depth {
                files.push(WalkEntry {
                    path: entry.path(),
                    relative,
                    metadata,
                });
            }
        }

        let depth = pending.depth + 1;
        if depth < max_depth {
            for (dir, prefix) in subdirs.into_iter().rev() {
                stack.push(Pending { dir, prefix, depth });
            }
        } else if !subdirs.is_empty() {
            tracing::debug!(
                "Skipping {} directories below {} (depth limit {max_depth})",
                subdirs.len(),
                pending.dir.display()
            );
        }
    }

    Ok(files)
}

/// Copies every regular file under `src` into `dst`, creating directories as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in walk_files(src, usize::MAX)? {
        let target = dst.join(&entry.relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        copied += fs::copy(&entry.path, &target)?;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }

    #[test]
    fn test_walk_order_is_deterministic() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b.js");
        touch(temp.path(), "a.css");
        touch(temp.path(), "static/js/main.js");
        touch(temp.path(), "static/css/main.css");
        touch(temp.path(), "assets/logo.svg");

        let names: Vec<String> = walk_files(temp.path(), 10)
            .unwrap()
            .into_iter()
            .map(|e| e.relative)
            .collect();

        assert_eq!(
            names,
            vec![
                "a.css",
                "b.js",
                "assets/logo.svg",
                "static/css/main.css",
                "static/js/main.js"
            ]
        );
    }

    #[test]
    fn test_walk_respects_depth() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "top.js");
        touch(temp.path(), "a/mid.js");
        touch(temp.path(), "a/b/deep.js");

        let names: Vec<String> = walk_files(temp.path(), 2)
            .unwrap()
            .into_iter()
            .map(|e| e.relative)
            .collect();

        assert_eq!(names, vec!["top.js", "a/mid.js"]);
    }

    #[test]
    fn test_copy_tree() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "index.html");
        touch(src.path(), "static/js/main.js");

        let target = dst.path().join("copy");
        let bytes = copy_tree(src.path(), &target).unwrap();

        assert!(bytes > 0);
        assert_eq!(
            fs::read_to_string(target.join("static/js/main.js")).unwrap(),
            "static/js/main.js"
        );
    }
}
