//! Asset loading and caching.
//!
//! [`AssetCache`] fetches each asset once per process, keeps the parsed node
//! tree as an immutable template and hands every caller its own clone.
//! Concurrent first requests for one asset share a single in-flight load.
//! A failed load is remembered and answered with the fallback primitive.

use std::{collections::HashMap, fmt, future::Future, path::PathBuf, sync::Arc};

use futures::{FutureExt, future::Shared};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{data_structures::scene_graph::SceneNode, resources::fetch::AssetFetcher};

pub mod fetch;
pub mod gltf;
pub mod primitive;

#[cfg(not(target_arch = "wasm32"))]
pub type LoadFuture<'a, T> = futures::future::BoxFuture<'a, T>;
#[cfg(target_arch = "wasm32")]
pub type LoadFuture<'a, T> = futures::future::LocalBoxFuture<'a, T>;

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn boxed<'a, T>(fut: impl Future<Output = T> + Send + 'a) -> LoadFuture<'a, T> {
    Box::pin(fut)
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn boxed<'a, T>(fut: impl Future<Output = T> + 'a) -> LoadFuture<'a, T> {
    Box::pin(fut)
}

/// Where an asset comes from and where its bytes are kept between runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssetSource {
    pub id: String,
    pub url: String,
    pub cache_path: PathBuf,
}

impl AssetSource {
    pub fn new(id: impl Into<String>, url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            cache_path: cache_path.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Downloading,
    Ready,
    Failed,
}

/// The canonical parsed copy of an asset. Never handed out directly.
#[derive(Debug)]
pub struct SceneTemplate {
    root: Box<dyn SceneNode>,
}

impl SceneTemplate {
    pub fn new(root: Box<dyn SceneNode>) -> Self {
        Self { root }
    }

    pub fn instantiate(&self) -> Box<dyn SceneNode> {
        self.root.clone_node()
    }
}

type LoadOutcome = Result<Arc<SceneTemplate>, Arc<anyhow::Error>>;

enum Entry {
    Downloading(Shared<LoadFuture<'static, LoadOutcome>>),
    Ready(Arc<SceneTemplate>),
    Failed(Arc<anyhow::Error>),
}

struct Inner {
    fetcher: Arc<dyn AssetFetcher>,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Process-wide asset cache. Clones share state.
#[derive(Clone)]
pub struct AssetCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetCache")
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}

impl AssetCache {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self, asset_id: &str) -> CacheState {
        match self.inner.entries.lock().get(asset_id) {
            None => CacheState::Absent,
            Some(Entry::Downloading(_)) => CacheState::Downloading,
            Some(Entry::Ready(_)) => CacheState::Ready,
            Some(Entry::Failed(_)) => CacheState::Failed,
        }
    }

    /// The reason a failed asset could not be loaded.
    pub fn failure(&self, asset_id: &str) -> Option<String> {
        match self.inner.entries.lock().get(asset_id) {
            Some(Entry::Failed(err)) => Some(format!("{err:#}")),
            _ => None,
        }
    }

    /// Returns a fresh clone of the asset, loading it first if needed.
    ///
    /// Never fails: an asset that cannot be fetched or parsed yields the
    /// fallback primitive.
    pub async fn get_or_load(&self, source: &AssetSource) -> Box<dyn SceneNode> {
        let pending = {
            let mut entries = self.inner.entries.lock();
            match entries.get(&source.id) {
                Some(Entry::Ready(template)) => return template.instantiate(),
                Some(Entry::Failed(_)) => return primitive::fallback_node(),
                Some(Entry::Downloading(pending)) => pending.clone(),
                None => {
                    let pending = self.load(source.clone()).shared();
                    entries.insert(source.id.clone(), Entry::Downloading(pending.clone()));
                    pending
                }
            }
        };

        let outcome = pending.await;
        self.settle(&source.id, &outcome);
        match outcome {
            Ok(template) => template.instantiate(),
            Err(_) => primitive::fallback_node(),
        }
    }

    fn settle(&self, asset_id: &str, outcome: &LoadOutcome) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(asset_id) else {
            return;
        };
        if matches!(entry, Entry::Downloading(_)) {
            *entry = match outcome {
                Ok(template) => {
                    info!("Asset '{asset_id}' ready");
                    Entry::Ready(Arc::clone(template))
                }
                Err(err) => {
                    warn!("Asset '{asset_id}' failed, showing the fallback: {err:#}");
                    Entry::Failed(Arc::clone(err))
                }
            };
        }
    }

    fn load(&self, source: AssetSource) -> LoadFuture<'static, LoadOutcome> {
        let fetcher = Arc::clone(&self.inner.fetcher);
        boxed(async move {
            load_template(fetcher.as_ref(), &source)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        })
    }
}

async fn load_template(
    fetcher: &dyn AssetFetcher,
    source: &AssetSource,
) -> anyhow::Result<SceneTemplate> {
    info!("Loading asset '{}' from {}", source.id, source.url);
    let bytes = read_or_fetch(fetcher, source).await?;
    match self::gltf::load_scene(&bytes, &source.url, fetcher).await {
        Ok(root) => Ok(SceneTemplate::new(root)),
        Err(err) => {
            discard_cached(source).await;
            Err(err.context(format!("failed to parse '{}'", source.id)))
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn read_or_fetch(fetcher: &dyn AssetFetcher, source: &AssetSource) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;

    let path = &source.cache_path;
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!("Asset '{}' found on disk at {}", source.id, path.display());
        return tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()));
    }

    let bytes = fetcher.fetch(&source.url).await?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            warn!("Cannot create cache directory {}: {err}", dir.display());
        }
    }
    match tokio::fs::write(path, &bytes).await {
        Ok(()) => debug!("Cached '{}' at {}", source.id, path.display()),
        Err(err) => warn!("Cannot cache '{}' at {}: {err}", source.id, path.display()),
    }
    Ok(bytes)
}

/// The browser's HTTP cache stands in for the file cache.
#[cfg(target_arch = "wasm32")]
async fn read_or_fetch(fetcher: &dyn AssetFetcher, source: &AssetSource) -> anyhow::Result<Vec<u8>> {
    fetcher.fetch(&source.url).await
}

/// Removes a cached file that failed to parse so the next process refetches it.
#[cfg(not(target_arch = "wasm32"))]
async fn discard_cached(source: &AssetSource) {
    if tokio::fs::remove_file(&source.cache_path).await.is_ok() {
        debug!("Removed unreadable cache file {}", source.cache_path.display());
    }
}

#[cfg(target_arch = "wasm32")]
async fn discard_cached(_source: &AssetSource) {}
