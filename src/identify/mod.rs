//! Species Identification
//!
//! Records returned by the vision API and a content-addressed cache in front
//! of it. Identical image bytes are identified once per TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::backend::SpeciesIdentifier;
use crate::cache::SharedCache;
use crate::error::Result;

/// Taxonomic kingdom as reported by the vision API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kingdom {
    Plant,
    Animal,
    Fungus,
    #[serde(other)]
    Other,
}

// == Species Record ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    pub common_name: String,
    pub scientific_name: String,
    pub kingdom: Kingdom,
    /// 0.0 to 1.0
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
}

// == Cached Identifier ==
/// Caches identification results by the SHA-256 of the image bytes.
///
/// Failed identifications are not cached.
pub struct CachedIdentifier {
    inner: Arc<dyn SpeciesIdentifier>,
    cache: SharedCache<SpeciesRecord>,
    ttl: Duration,
}

impl CachedIdentifier {
    /// # Arguments
    /// * `inner` - The identifier that performs the remote call
    /// * `cache` - Shared cache the records are stored in
    /// * `ttl` - How long a record stays fresh
    pub fn new(
        inner: Arc<dyn SpeciesIdentifier>,
        cache: SharedCache<SpeciesRecord>,
        ttl: Duration,
    ) -> Self {
        Self { inner, cache, ttl }
    }

    /// Cache key of an image: `species:<sha256 hex>`.
    pub fn cache_key(image: &[u8]) -> String {
        format!("species:{}", hex::encode(Sha256::digest(image)))
    }
}

#[async_trait]
impl SpeciesIdentifier for CachedIdentifier {
    async fn identify(&self, image: &[u8]) -> Result<SpeciesRecord> {
        let key = Self::cache_key(image);

        if let Some(record) = self.cache.write().await.get(&key) {
            debug!(%key, "species cache hit");
            return Ok(record);
        }

        let record = self.inner.identify(image).await?;
        info!(species = %record.scientific_name, confidence = record.confidence, "species identified");
        self.cache
            .write()
            .await
            .set(key, record.clone(), Some(self.ttl));
        Ok(record)
    }
}
