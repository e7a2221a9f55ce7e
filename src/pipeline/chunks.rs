use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Error, Result};

const CHUNK_PREFIX: &str = "chunk-";

/// On-disk storage for chunked uploads: `<root>/<session>/chunk-NNNNNN`.
///
/// Each chunk is an independent numbered file, so chunks may arrive out of
/// order or more than once. Reassembly reads them sorted by number.
pub struct ChunkStore {
    base_path: PathBuf,
}

impl ChunkStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            base_path: data_dir.join("uploads"),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join(session_id)
    }

    fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{CHUNK_PREFIX}{index:06}"))
    }

    fn temp_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id)
            .join(format!(".tmp-{}", Uuid::new_v4()))
    }

    /// Stores one chunk. Writing the same index again replaces it.
    pub async fn write_chunk(&self, session_id: &str, index: u32, data: &[u8]) -> Result<()> {
        validate_session_id(session_id)?;

        let temp_path = self.temp_path(session_id);
        fs::create_dir_all(self.session_dir(session_id)).await?;

        let mut temp_file = File::create(&temp_path).await?;
        temp_file.write_all(data).await?;
        temp_file.sync_all().await?;

        fs::rename(&temp_path, self.chunk_path(session_id, index)).await?;
        Ok(())
    }

    /// Chunk indexes received so far, ascending.
    pub async fn received(&self, session_id: &str) -> Result<Vec<u32>> {
        validate_session_id(session_id)?;

        let mut entries = match fs::read_dir(self.session_dir(session_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut indexes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHUNK_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            indexes.push(index);
        }
        indexes.sort_unstable();
        Ok(indexes)
    }

    /// Concatenates chunks `0..total_chunks` into `dest`. Fails with a
    /// validation error naming the first missing chunks, or when the
    /// assembled size would exceed `max_bytes`.
    pub async fn assemble(
        &self,
        session_id: &str,
        total_chunks: u32,
        dest: &Path,
        max_bytes: u64,
    ) -> Result<u64> {
        let received = self.received(session_id).await?;
        let missing: Vec<u32> = (0..total_chunks)
            .filter(|i| received.binary_search(i).is_err())
            .collect();
        if !missing.is_empty() {
            let shown = missing
                .iter()
                .take(10)
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::Validation(format!(
                "upload is missing {} chunk(s): {shown}",
                missing.len()
            )));
        }

        let mut out = File::create(dest).await?;
        let mut written = 0u64;
        for index in 0..total_chunks {
            let mut chunk = File::open(self.chunk_path(session_id, index)).await?;
            written += tokio::io::copy(&mut chunk, &mut out).await?;
            if written > max_bytes {
                drop(out);
                let _ = fs::remove_file(dest).await;
                return Err(Error::Validation(format!(
                    "upload exceeds the limit of {max_bytes} bytes"
                )));
            }
        }
        out.sync_all().await?;
        Ok(written)
    }

    /// Deletes all chunk state for a session. Returns false if there was none.
    pub async fn cancel(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;

        match fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Removes session directories untouched for longer than `max_age`.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age > max_age {
                fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    Uuid::parse_str(session_id)
        .map(|_| ())
        .map_err(|_| Error::Validation("invalid upload session id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn test_out_of_order_and_duplicate_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let id = session();

        store.write_chunk(&id, 2, b"cc").await.unwrap();
        store.write_chunk(&id, 0, b"aa").await.unwrap();
        store.write_chunk(&id, 1, b"xx").await.unwrap();
        store.write_chunk(&id, 1, b"bb").await.unwrap();

        assert_eq!(store.received(&id).await.unwrap(), vec![0, 1, 2]);

        let dest = temp_dir.path().join("assembled.zip");
        let size = store.assemble(&id, 3, &dest, 1024).await.unwrap();
        assert_eq!(size, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"aabbcc");
    }

    #[tokio::test]
    async fn test_assemble_reports_missing_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let id = session();

        store.write_chunk(&id, 0, b"a").await.unwrap();
        store.write_chunk(&id, 2, b"c").await.unwrap();

        let dest = temp_dir.path().join("assembled.zip");
        let err = store.assemble(&id, 3, &dest, 1024).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("1 chunk(s): 1")));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_assemble_enforces_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let id = session();

        store.write_chunk(&id, 0, &[0u8; 600]).await.unwrap();
        store.write_chunk(&id, 1, &[0u8; 600]).await.unwrap();

        let dest = temp_dir.path().join("assembled.zip");
        let result = store.assemble(&id, 2, &dest, 1000).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_cancel_removes_state() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let id = session();

        store.write_chunk(&id, 0, b"a").await.unwrap();
        assert!(store.cancel(&id).await.unwrap());
        assert!(store.received(&id).await.unwrap().is_empty());
        assert!(!store.cancel(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_like_session_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());

        let result = store.write_chunk("../escape", 0, b"a").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::new(temp_dir.path());
        let id = session();
        store.write_chunk(&id, 0, b"a").await.unwrap();

        assert_eq!(store.sweep_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.sweep_stale(Duration::ZERO).await.unwrap(), 1);
        assert!(store.received(&id).await.unwrap().is_empty());
    }
}
