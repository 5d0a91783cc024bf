//! Byte sources for assets.

#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};

use crate::resources::LoadFuture;

/// Downloads the raw bytes behind a URL.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> LoadFuture<'static, anyhow::Result<Vec<u8>>>;
}

/// Fetches over HTTP(S).
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        #[cfg(not(target_arch = "wasm32"))]
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        #[cfg(target_arch = "wasm32")]
        let client = reqwest::Client::new();
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> LoadFuture<'static, anyhow::Result<Vec<u8>>> {
        let client = self.client.clone();
        let url = url.to_string();
        crate::resources::boxed(async move {
            log::debug!("GET {url}");
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                anyhow::bail!("HTTP error {} for {url}", resp.status());
            }
            anyhow::Ok(resp.bytes().await?.to_vec())
        })
    }
}

/// Resolves URLs as paths below a root directory. `file://` prefixes are stripped.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct FileFetcher {
    root: PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileFetcher {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl AssetFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> LoadFuture<'static, anyhow::Result<Vec<u8>>> {
        use anyhow::Context;

        let path = self.root.join(url.strip_prefix("file://").unwrap_or(url));
        crate::resources::boxed(async move {
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))
        })
    }
}
