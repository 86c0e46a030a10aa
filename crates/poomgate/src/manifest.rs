//! Per-run manifest lookups through the single-flight TTL cache.

use async_trait::async_trait;
use poomproto::{Manifest, ToolError};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, Clock, TtlCache};
use crate::upstream::{UpstreamClient, UpstreamRequest};

/// Where manifests come from on a cache miss.
#[async_trait]
pub trait ManifestSource: Send + Sync + 'static {
    async fn fetch_manifest(&self, run_id: &str) -> Result<Manifest, ToolError>;
}

#[async_trait]
impl ManifestSource for UpstreamClient {
    async fn fetch_manifest(&self, run_id: &str) -> Result<Manifest, ToolError> {
        let value = self
            .call(&UpstreamRequest::get(["runs", run_id, "manifest"]))
            .await?;
        let mut manifest: Manifest = serde_json::from_value(value).map_err(|e| {
            ToolError::upstream_format(format!("manifest for run {} is malformed: {}", run_id, e))
        })?;
        if manifest.run_id.is_empty() {
            manifest.run_id = run_id.to_string();
        }
        Ok(manifest)
    }
}

/// Manifest cache keyed by run id.
pub struct ManifestCache {
    source: Arc<dyn ManifestSource>,
    cache: TtlCache<String, Manifest>,
}

impl ManifestCache {
    pub fn new(source: Arc<dyn ManifestSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn with_clock(source: Arc<dyn ManifestSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            cache: TtlCache::with_clock(ttl, clock),
        }
    }

    #[tracing::instrument(skip(self), fields(run.id = %run_id))]
    pub async fn get(&self, run_id: &str) -> Result<Manifest, ToolError> {
        let source = Arc::clone(&self.source);
        let key = run_id.to_string();
        self.cache
            .get_or_fetch(key.clone(), move || async move {
                source.fetch_manifest(&key).await
            })
            .await
    }

    pub fn invalidate(&self, run_id: &str) {
        self.cache.invalidate(&run_id.to_string());
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn ttl(&self) -> Duration {
        self.cache.ttl()
    }
}
