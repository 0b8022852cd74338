use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use stormcache_common::{CacheError, CacheResult};

use crate::store::CacheStore;

/// Camada de codec sobre um `CacheStore`: valores estruturados são
/// gravados como JSON. A semântica de persistência é a do store interno.
pub struct TypedCache<S, T> {
    inner: S,
    _marker: PhantomData<fn() -> T>,
}

impl<S: CacheStore, T: Serialize + DeserializeOwned> TypedCache<S, T> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn insert(&self, key: &str, value: &T) -> CacheResult<()> {
        let data = serde_json::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))?;
        self.inner.insert(key, Bytes::from(data)).await
    }

    pub async fn retrieve(&self, key: &str) -> CacheResult<T> {
        let data = self.inner.retrieve(key).await?;
        serde_json::from_slice(&data).map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }
}
