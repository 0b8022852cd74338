use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use stormcache_common::CacheResult;

/// Contrato público de um store de cache.
///
/// Toda operação só conclui depois que o arquivo de suporte foi gravado
/// (ou a gravação falhou). Decoradores como o `ExpiringStore` compõem
/// sobre este trait sem conhecer o mecanismo de persistência.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Grava `value` em `key` (last-write-wins).
    async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()>;

    /// Devolve o valor atual de `key` ou `NotFound`.
    async fn retrieve(&self, key: &str) -> CacheResult<Bytes>;

    /// Remove `key`. Remover chave inexistente não é erro.
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()> {
        (**self).insert(key, value).await
    }

    async fn retrieve(&self, key: &str) -> CacheResult<Bytes> {
        (**self).retrieve(key).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        (**self).delete(key).await
    }
}
