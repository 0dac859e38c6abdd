//! Remote Blob Store Abstraction
//!
//! The engine only needs three capabilities from the remote tier - get, put,
//! and list by key - so that is the whole trait. The production
//! implementation adapts the `object_store` crate (S3, GCS, Azure, local
//! filesystem, in-memory); tests plug in `object_store::memory::InMemory`
//! through the same adapter.
//!
//! Error classification is part of the contract: `NotFound` is permanent
//! (retrying the same key is pointless), everything else is `Transient` and
//! subject to the caller's retry chain.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use crate::error::BlobStoreError;

pub type BlobResult<T> = std::result::Result<T, BlobStoreError>;

/// Minimal remote object capability required by the cloud tier
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a whole object.
    async fn get_object(&self, bucket: &str, key: &str) -> BlobResult<Bytes>;

    /// Store a whole object.
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> BlobResult<()>;

    /// List object keys under a prefix.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> BlobResult<Vec<String>>;
}

/// `BlobStore` over per-bucket `object_store::ObjectStore` handles
#[derive(Default)]
pub struct ObjectStoreAdapter {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the store backing `bucket`.
    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    fn store(&self, bucket: &str, key: &str) -> BlobResult<&Arc<dyn ObjectStore>> {
        self.stores
            .get(bucket)
            .ok_or_else(|| BlobStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl BlobStore for ObjectStoreAdapter {
    async fn get_object(&self, bucket: &str, key: &str) -> BlobResult<Bytes> {
        let store = self.store(bucket, key)?;
        let path = ObjectPath::from(key);
        let result = store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => BlobStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => BlobStoreError::Transient(other.to_string()),
        })?;
        result
            .bytes()
            .await
            .map_err(|e| BlobStoreError::Transient(e.to_string()))
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> BlobResult<()> {
        let store = self.store(bucket, key)?;
        let path = ObjectPath::from(key);
        store
            .put(&path, data.into())
            .await
            .map_err(|e| BlobStoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> BlobResult<Vec<String>> {
        let store = self.store(bucket, prefix)?;
        let path = ObjectPath::from(prefix);
        let mut stream = store.list(Some(&path));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| BlobStoreError::Transient(e.to_string()))?;
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }
}
