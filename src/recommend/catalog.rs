//! Content candidate cache
//!
//! Readers clone an `Arc` to an immutable [`CatalogSnapshot`] and never see a
//! half-applied reload. A background task swaps in a fresh snapshot from the
//! [`ContentSource`] on an interval.

use crate::error::{PulseError, Result};
use crate::types::ContentItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Content metadata store
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ContentItem>>;

    fn describe(&self) -> String;
}

/// Fixed in-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticContentSource {
    items: Vec<ContentItem>,
}

impl StaticContentSource {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn load(&self) -> Result<Vec<ContentItem>> {
        Ok(self.items.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} items)", self.items.len())
    }
}

/// JSON array of content items on disk
#[derive(Debug, Clone)]
pub struct JsonFileContentSource {
    path: PathBuf,
}

impl JsonFileContentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContentSource for JsonFileContentSource {
    async fn load(&self) -> Result<Vec<ContentItem>> {
        let path = self.path.clone();
        let contents = tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
            .await
            .map_err(|e| PulseError::Store(format!("catalog reader panicked: {}", e)))??;
        let items: Vec<ContentItem> = serde_json::from_str(&contents)?;
        Ok(items)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Immutable view of the catalog
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub loaded_at: Option<DateTime<Utc>>,
    pub items: Vec<ContentItem>,
    index: HashMap<String, usize>,
}

impl CatalogSnapshot {
    pub fn new(version: u64, items: Vec<ContentItem>) -> Self {
        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.content_id.clone(), i))
            .collect();
        Self {
            version,
            loaded_at: Some(Utc::now()),
            items,
            index,
        }
    }

    pub fn get(&self, content_id: &str) -> Option<&ContentItem> {
        self.index.get(content_id).map(|&i| &self.items[i])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Snapshot holder with periodic reload
pub struct CandidateCache {
    source: Arc<dyn ContentSource>,
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl CandidateCache {
    /// Create new cache; call [`refresh`](Self::refresh) before serving
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reload from the source; the old snapshot stays on failure
    pub async fn refresh(&self) -> Result<u64> {
        let items = self.source.load().await?;

        // Duplicate ids keep their last occurrence
        let mut seen = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            seen.insert(item.content_id.clone(), i);
        }
        let deduped: Vec<ContentItem> = items
            .into_iter()
            .enumerate()
            .filter(|(i, item)| seen.get(&item.content_id) == Some(i))
            .map(|(_, item)| item)
            .collect();

        // Versions are assigned under the write lock so they only ever increase
        let count = deduped.len();
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let version = current.version + 1;
        *current = Arc::new(CatalogSnapshot::new(version, deduped));
        drop(current);
        debug!("Catalog v{} loaded: {} items", version, count);
        Ok(version)
    }

    /// Spawn the reload loop
    pub fn spawn_refresh(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Catalog refresh from {} every {:?}", self.source.describe(), every);
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Catalog refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!("Catalog refresh failed, keeping v{}: {}", self.snapshot().version, e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn item(id: &str, title: &str) -> ContentItem {
        ContentItem {
            content_id: id.to_string(),
            title: Some(title.to_string()),
            category_id: "news".to_string(),
            tags: BTreeSet::new(),
            published_at: Utc::now(),
            popularity: 0,
            like_count: 0,
            featured: false,
        }
    }

    #[tokio::test]
    async fn test_refresh_bumps_version_and_dedupes() {
        let source = StaticContentSource::new(vec![item("a", "first"), item("b", "b"), item("a", "second")]);
        let cache = CandidateCache::new(Arc::new(source));
        assert_eq!(cache.snapshot().version, 0);

        assert_eq!(cache.refresh().await.unwrap(), 1);
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a").and_then(|i| i.title.as_deref()), Some("second"));

        assert_eq!(cache.refresh().await.unwrap(), 2);
        // Readers holding the old Arc keep a consistent view
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_never_go_backwards() {
        let source = StaticContentSource::new(vec![item("a", "A")]);
        let cache = Arc::new(CandidateCache::new(Arc::new(source)));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..8 {
                    cache.refresh().await.unwrap();
                    seen.push(cache.snapshot().version);
                }
                seen
            });
        }
        while let Some(seen) = tasks.join_next().await {
            let seen = seen.unwrap();
            assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        }
        assert_eq!(cache.snapshot().version, 128);
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let items = vec![item("a", "A")];
        std::fs::write(&path, serde_json::to_string(&items).unwrap()).unwrap();

        let cache = CandidateCache::new(Arc::new(JsonFileContentSource::new(&path)));
        cache.refresh().await.unwrap();
        assert_eq!(cache.snapshot().len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(cache.refresh().await, Err(PulseError::Serialization(_))));
        assert_eq!(cache.snapshot().len(), 1);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(cache.refresh().await, Err(PulseError::Io(_))));
        assert_eq!(cache.snapshot().version, 1);
    }
}
