//! Session-wide deployment cache

use crate::builder::WorldBuilder;
use crate::bundle::SessionBundle;
use crate::cache::CacheStore;
use crate::HarnessResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Builds the session world at most once and serves it from the store.
///
/// A bundle found in the store is decoded once and kept resident; a
/// decode failure is returned as is and the entry is left in place.
pub struct SessionCache {
    store: Arc<dyn CacheStore>,
    builder: WorldBuilder,
    key: String,
    bundle: OnceCell<Arc<SessionBundle>>,
    builds: AtomicUsize,
}

impl SessionCache {
    /// Cache over `store`, keyed by the builder's configured cache key
    pub fn new(builder: WorldBuilder, store: Arc<dyn CacheStore>) -> Self {
        let key = builder.config().cache_key.clone();
        Self {
            store,
            builder,
            key,
            bundle: OnceCell::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Cache key in use
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of world builds this cache has performed
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// The session bundle, building and storing it on a cache miss
    pub async fn get_or_build(&self) -> HarnessResult<Arc<SessionBundle>> {
        let bundle = self
            .bundle
            .get_or_try_init(|| async { self.load_or_build().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(bundle))
    }

    async fn load_or_build(&self) -> HarnessResult<SessionBundle> {
        if let Some(bytes) = self.store.get(&self.key)? {
            info!("Session cache hit for '{}' ({} bytes)", self.key, bytes.len());
            let bundle = SessionBundle::decode(&self.key, &bytes)?;
            debug!("Session manifest: {}", bundle.manifest_json()?);
            return Ok(bundle);
        }

        info!("Session cache miss for '{}', building world", self.key);
        let bundle = self.builder.build().await?;
        self.builds.fetch_add(1, Ordering::SeqCst);

        let bytes = bundle.encode()?;
        self.store.set(&self.key, &bytes)?;
        debug!("Session manifest: {}", bundle.manifest_json()?);
        Ok(bundle)
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("key", &self.key)
            .field("resident", &self.bundle.initialized())
            .field("builds", &self.builds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::CACHE_FORMAT_VERSION;
    use crate::cache::{FileCacheStore, MemoryCacheStore};
    use crate::config::HarnessConfig;
    use crate::HarnessError;
    use tempfile::tempdir;

    fn builder() -> WorldBuilder {
        WorldBuilder::new(HarnessConfig::default())
    }

    #[tokio::test]
    async fn test_builds_once_per_process() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = SessionCache::new(builder(), store.clone());

        let first = cache.get_or_build().await.unwrap();
        let second = cache.get_or_build().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.builds(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_second_cache_reuses_stored_entry() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(dir.path()));

        let first = SessionCache::new(builder(), store.clone());
        let built = first.get_or_build().await.unwrap();

        let second = SessionCache::new(builder(), store);
        let loaded = second.get_or_build().await.unwrap();

        assert_eq!(second.builds(), 0);
        assert_eq!(*loaded, *built);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_fatal() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut bytes = CACHE_FORMAT_VERSION.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff; 16]);
        store.set("deployment", &bytes).unwrap();

        let cache = SessionCache::new(builder(), store.clone());
        let err = cache.get_or_build().await.unwrap_err();

        assert!(matches!(err, HarnessError::CorruptCache { .. }));
        assert_eq!(cache.builds(), 0);
        assert_eq!(store.get("deployment").unwrap(), Some(bytes));
    }

    #[tokio::test]
    async fn test_incompatible_entry_is_fatal() {
        let store = Arc::new(MemoryCacheStore::new());
        store.set("deployment", &0u32.to_le_bytes()).unwrap();

        let cache = SessionCache::new(builder(), store);
        let err = cache.get_or_build().await.unwrap_err();
        assert!(matches!(err, HarnessError::IncompatibleCache { found: 0, .. }));
    }

    #[tokio::test]
    async fn test_cache_key_from_config() {
        let store = Arc::new(MemoryCacheStore::new());
        let builder = WorldBuilder::new(HarnessConfig::default().with_cache_key("other"));
        let cache = SessionCache::new(builder, store.clone());

        cache.get_or_build().await.unwrap();
        assert_eq!(cache.key(), "other");
        assert!(store.get("other").unwrap().is_some());
        assert!(store.get("deployment").unwrap().is_none());
    }
}
