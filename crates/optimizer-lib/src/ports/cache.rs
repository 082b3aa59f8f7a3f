//! Checkpoint caches: in-memory and file-backed
//!
//! Both honor per-entry TTLs. The file cache writes each entry atomically
//! (temp file, fsync, rename) so a crash never leaves a torn checkpoint.

use super::CheckpointCache;
use crate::error::{OptimizerError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Cache held in process memory
#[derive(Default)]
pub struct MemoryCheckpointCache {
    entries: DashMap<String, (Vec<u8>, Instant)>,
}

impl MemoryCheckpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointCache for MemoryCheckpointCache {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.value().1 > now => return Ok(Some(entry.value().0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Cache storing one file per key under a directory
pub struct FileCheckpointCache {
    dir: PathBuf,
}

impl FileCheckpointCache {
    /// Create the cache, creating `dir` if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            OptimizerError::Cache(format!("failed to create cache directory {:?}: {}", dir, e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.ckpt", hex::encode(digest)))
    }

    /// Remove every expired entry; returns how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| OptimizerError::Cache(format!("failed to list cache directory: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OptimizerError::Cache(format!("failed to list cache directory: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ckpt") {
                continue;
            }
            match read_entry(&path).await {
                Ok(Some(_)) => {}
                Ok(None) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Unreadable cache entry"),
            }
        }
        Ok(removed)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Read an entry, deleting it when expired. Entries are `<expires_at>\n<payload>`.
async fn read_entry(path: &Path) -> Result<Option<Vec<u8>>> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(OptimizerError::Cache(format!(
                "failed to read {:?}: {}",
                path, e
            )))
        }
    };

    let split = data
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| OptimizerError::Cache(format!("malformed cache entry {:?}", path)))?;
    let expires_at: u64 = std::str::from_utf8(&data[..split])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| OptimizerError::Cache(format!("malformed cache header {:?}", path)))?;

    if expires_at <= unix_now() {
        debug!(path = %path.display(), "Cache entry expired");
        let _ = fs::remove_file(path).await;
        return Ok(None);
    }
    Ok(Some(data[split + 1..].to_vec()))
}

#[async_trait]
impl CheckpointCache for FileCheckpointCache {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");
        let expires_at = unix_now() + ttl.as_secs().max(1);

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(format!("{}\n", expires_at).as_bytes()).await?;
            file.write_all(&value).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        };
        write.await.map_err(|e| {
            OptimizerError::Cache(format!("failed to write checkpoint {:?}: {}", path, e))
        })?;

        debug!(key = %key, bytes = value.len(), "Checkpoint written to disk");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_entry(&self.path_for(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OptimizerError::Cache(format!(
                "failed to delete checkpoint {}: {}",
                key, e
            ))),
        }
    }
}
