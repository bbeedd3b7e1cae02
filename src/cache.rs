//! Content-addressed report cache.
//!
//! Maps a fingerprint of (document bytes, mode) to a finished report so the
//! same submission is never synthesized twice. Entries are written once and
//! never invalidated here; eviction is an operational concern.
//!
//! Two identical submissions racing each other may both miss and both
//! write. Both produce a valid report, so the last writer simply wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::modes::AnalysisMode;

/// Deterministic cache key: `hex(sha256(bytes)) + "_" + mode`.
pub fn fingerprint(bytes: &[u8], mode: AnalysisMode) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}_{}", hex::encode(digest), mode.as_str())
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the cached report for `fingerprint`, if any.
    async fn get(&self, fingerprint: &str) -> Result<Option<String>>;

    /// Stores `text` under `fingerprint`, replacing any previous entry.
    async fn put(&self, fingerprint: &str, text: &str) -> Result<()>;
}

/// One Markdown file per entry under a cache directory.
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    /// Opens (creating if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.md", fingerprint))
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let path = self.entry_path(fingerprint);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read cache entry: {}", path.display()))
            }
        }
    }

    async fn put(&self, fingerprint: &str, text: &str) -> Result<()> {
        // Write beside the target and rename so readers never see a partial entry.
        let path = self.entry_path(fingerprint);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", fingerprint, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, text)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e)
                .with_context(|| format!("Failed to commit cache entry: {}", path.display()));
        }
        Ok(())
    }
}

/// In-memory cache for tests and embedding.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        Ok(entries.get(fingerprint).cloned())
    }

    async fn put(&self, fingerprint: &str, text: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        entries.insert(fingerprint.to_string(), text.to_string());
        Ok(())
    }
}
