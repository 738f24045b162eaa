//! On-disk cache of sub-level history leaves
//!
//! Leaf sets are keyed by module root, level layout, message height and the
//! step heights chosen at every enclosing sub-level:
//!
//! `<base>/<module root>/levels-<l0>-<l1>-.../message-<m>/step-<h1>/.../hashes.bin`
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never observes a partial file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use xlayer_core::{Hash, Height};

const FILE_NAME: &str = "hashes.bin";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No file for the key
    #[error("no cached leaves for key")]
    NotFound,
    /// A file for the key was already written
    #[error("cache file already exists: {0}")]
    FileAlreadyExists(PathBuf),
    /// Filesystem failure
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    /// Corrupt or unencodable contents
    #[error("cache encoding error: {0}")]
    Encoding(String),
}

/// Location of one leaf set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    /// Machine the leaves were produced by
    pub module_root: Hash,
    /// Level heights the leaves were sampled under
    pub level_heights: Vec<Height>,
    /// Message (block-level height) being replayed
    pub message_height: Height,
    /// Heights chosen at the enclosing sub-levels, outermost first
    pub step_heights: Vec<Height>,
}

impl CacheKey {
    fn dir(&self, base: &Path) -> PathBuf {
        let mut dir = base.join(format!("0x{}", hex::encode(self.module_root)));
        let levels: Vec<String> = self.level_heights.iter().map(ToString::to_string).collect();
        dir.push(format!("levels-{}", levels.join("-")));
        dir.push(format!("message-{}", self.message_height));
        for height in &self.step_heights {
            dir.push(format!("step-{}", height));
        }
        dir
    }
}

/// Directory-backed leaf cache
#[derive(Clone, Debug)]
pub struct HistoryCache {
    base_dir: PathBuf,
}

impl HistoryCache {
    /// Cache rooted at `base_dir`, created lazily
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Path of the file holding `key`
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        key.dir(&self.base_dir).join(FILE_NAME)
    }

    /// Read the leaves stored under `key`
    pub async fn get(&self, key: &CacheKey) -> Result<Vec<Hash>, CacheError> {
        let path = self.path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CacheError::NotFound),
            Err(e) => return Err(e.into()),
        };
        bincode::deserialize(&bytes).map_err(|e| CacheError::Encoding(e.to_string()))
    }

    /// Store `leaves` under `key`.
    ///
    /// Fails with [`CacheError::FileAlreadyExists`] when the key was written
    /// before; callers treat that as success.
    pub async fn put(&self, key: &CacheKey, leaves: &[Hash]) -> Result<(), CacheError> {
        let path = self.path(key);
        if tokio::fs::try_exists(&path).await? {
            return Err(CacheError::FileAlreadyExists(path));
        }
        self.replace(key, leaves).await
    }

    /// Store `leaves` under `key`, replacing any earlier file
    pub async fn replace(&self, key: &CacheKey, leaves: &[Hash]) -> Result<(), CacheError> {
        let path = self.path(key);
        let dir = key.dir(&self.base_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = bincode::serialize(leaves).map_err(|e| CacheError::Encoding(e.to_string()))?;
        let tmp = dir.join(format!(
            "{}.tmp-{}-{}",
            FILE_NAME,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Cached {} leaves at {}", leaves.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(steps: Vec<Height>) -> CacheKey {
        CacheKey {
            module_root: [7u8; 32],
            level_heights: vec![8, 4],
            message_height: 3,
            step_heights: steps,
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32]];

        assert!(matches!(cache.get(&key(vec![])).await, Err(CacheError::NotFound)));
        cache.put(&key(vec![]), &leaves).await.unwrap();
        assert_eq!(cache.get(&key(vec![])).await.unwrap(), leaves);
        // a different step path is a different key
        assert!(matches!(cache.get(&key(vec![0])).await, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn test_second_put_reports_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let k = key(vec![4, 1]);
        cache.put(&k, &[[1u8; 32]]).await.unwrap();
        assert!(matches!(
            cache.put(&k, &[[9u8; 32]]).await,
            Err(CacheError::FileAlreadyExists(_))
        ));
        assert_eq!(cache.get(&k).await.unwrap(), vec![[1u8; 32]]);

        cache.replace(&k, &[[9u8; 32], [8u8; 32]]).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), vec![[9u8; 32], [8u8; 32]]);
    }

    #[tokio::test]
    async fn test_level_layout_is_part_of_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        cache.put(&key(vec![]), &[[1u8; 32]; 5]).await.unwrap();
        let other = CacheKey {
            level_heights: vec![8, 2],
            ..key(vec![])
        };
        assert!(matches!(cache.get(&other).await, Err(CacheError::NotFound)));
    }

    #[test]
    fn test_layout() {
        let cache = HistoryCache::new("/cache");
        let path = cache.path(&key(vec![4, 1]));
        let expected = format!("/cache/0x{}/levels-8-4/message-3/step-4/step-1/hashes.bin", hex::encode([7u8; 32]));
        assert_eq!(path, PathBuf::from(expected));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let k = key(vec![]);
        let path = cache.path(&k);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"xx").await.unwrap();
        assert!(matches!(cache.get(&k).await, Err(CacheError::Encoding(_))));
    }
}
