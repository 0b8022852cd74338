//! Decorador de expiração por tempo sobre qualquer `CacheStore`.
//!
//! Cada insert grava `now + ttl` no ledger (arquivo sidecar) antes de
//! repassar ao store interno. A expiração é verificada de forma lazy no
//! `retrieve`: não existe task de varredura em background. Entradas
//! expiradas ficam no disco até o próximo `retrieve`/`delete` da chave ou
//! até uma chamada explícita de `purge_expired`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use stormcache_common::{CacheError, CacheResult};

use crate::blob::BlobStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{StoreConfig, expiry_path};
use crate::ledger::{ExpiryLedger, LedgerStatus};
use crate::map_store::MapStore;
use crate::store::CacheStore;

/// Locks por chave. Entradas ociosas são removidas ao liberar o guard.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // O RefMut do DashMap é liberado antes do await.
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // strong_count == 1: só o mapa referencia o lock, ninguém está esperando
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Store com expiração por TTL.
///
/// Operações na mesma chave são serializadas (ledger e store interno nunca
/// intercalam mutações de chamadas diferentes); o ledger fica atrás de um
/// mutex único, então o arquivo sidecar segue uma ordem total de gravações.
pub struct ExpiringStore<S> {
    inner: S,
    ledger: Mutex<ExpiryLedger>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    key_locks: KeyLocks,
}

impl<S: CacheStore> ExpiringStore<S> {
    /// Envolve `inner`, carregando o ledger de `ledger_config`.
    pub async fn open(inner: S, ledger_config: StoreConfig, ttl: Duration) -> CacheResult<Self> {
        let ledger = ExpiryLedger::open(ledger_config).await?;
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        info!("expiring store pronto: ttl={}s", ttl.num_seconds());
        Ok(Self {
            inner,
            ledger: Mutex::new(ledger),
            ttl,
            clock: Arc::new(SystemClock),
            key_locks: KeyLocks::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Instante de expiração gravado para `key`, se houver.
    pub async fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.ledger.lock().await.expires_at(key)
    }

    /// Varre o ledger e remove (em cascata) todas as chaves expiradas.
    /// Retorna quantas foram removidas.
    pub async fn purge_expired(&self) -> CacheResult<usize> {
        let candidates = self.ledger.lock().await.expired_keys(self.clock.now());
        let mut purged = 0;

        for key in candidates {
            let _guard = self.key_locks.lock(&key).await;
            // pode ter sido reinserida enquanto esperávamos o lock
            let status = self.ledger.lock().await.status(&key, self.clock.now());
            if let LedgerStatus::Expired(_) = status {
                self.cascade_delete(&key).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            info!("{purged} chaves expiradas removidas");
        }
        Ok(purged)
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Remove do ledger e do store interno. Só grava o ledger se ele mudou.
    async fn cascade_delete(&self, key: &str) -> CacheResult<()> {
        {
            let mut ledger = self.ledger.lock().await;
            let previous = ledger.remove(key);
            if previous.is_some()
                && let Err(e) = ledger.save().await
            {
                ledger.restore(key, previous);
                return Err(CacheError::deletion(key, e));
            }
        }
        self.inner
            .delete(key)
            .await
            .map_err(|e| CacheError::deletion(key, e))?;
        debug!("key expirada removida: {key}");
        Ok(())
    }
}

impl ExpiringStore<MapStore> {
    /// `MapStore` em `config.path` com ledger em `<path>.expiry`, ambos carregados.
    pub async fn open_map(config: StoreConfig, ttl: Duration) -> CacheResult<Self> {
        let ledger_config = config.expiry_sidecar();
        let inner = MapStore::open(config).await?;
        Self::open(inner, ledger_config, ttl).await
    }
}

impl ExpiringStore<BlobStore> {
    /// `BlobStore` com raiz em `config.path`; o ledger fica ao lado do índice.
    pub async fn open_blob(config: StoreConfig, ttl: Duration) -> CacheResult<Self> {
        let ledger_config = StoreConfig {
            path: expiry_path(&config.blob_index_path()),
            fsync: config.fsync,
        };
        let inner = BlobStore::open(config).await?;
        Self::open(inner, ledger_config, ttl).await
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for ExpiringStore<S> {
    async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let _guard = self.key_locks.lock(key).await;

        {
            let mut ledger = self.ledger.lock().await;
            let at = self.expiry_from(self.clock.now());
            let previous = ledger.set(key, at);
            // falha no ledger interrompe: o store interno não é tocado e a
            // entrada anterior volta, então um valor expirado segue expirado
            if let Err(e) = ledger.save().await {
                ledger.restore(key, previous);
                return Err(CacheError::insertion(key, e));
            }
            debug!("ledger: {key} expira em {at} ({:?})", ledger.path());
        }

        self.inner
            .insert(key, value)
            .await
            .map_err(|e| CacheError::insertion(key, e))
    }

    async fn retrieve(&self, key: &str) -> CacheResult<Bytes> {
        let _guard = self.key_locks.lock(key).await;

        let status = self.ledger.lock().await.status(key, self.clock.now());
        match status {
            LedgerStatus::Live(_) => self.inner.retrieve(key).await,
            LedgerStatus::Missing | LedgerStatus::Expired(_) => {
                self.cascade_delete(key).await?;
                Err(CacheError::not_found(key))
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let _guard = self.key_locks.lock(key).await;

        {
            let mut ledger = self.ledger.lock().await;
            let previous = ledger.remove(key);
            if let Err(e) = ledger.save().await {
                ledger.restore(key, previous);
                return Err(CacheError::deletion(key, e));
            }
        }

        self.inner
            .delete(key)
            .await
            .map_err(|e| CacheError::deletion(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(60);

    /// Store em memória que registra as chamadas recebidas.
    #[derive(Default)]
    struct RecordingStore {
        calls: StdMutex<Vec<String>>,
        data: StdMutex<std::collections::HashMap<String, Bytes>>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CacheStore for RecordingStore {
        async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()> {
            self.calls.lock().unwrap().push(format!("insert {key}"));
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn retrieve(&self, key: &str) -> CacheResult<Bytes> {
            self.calls.lock().unwrap().push(format!("retrieve {key}"));
            self.data
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| CacheError::not_found(key))
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.calls.lock().unwrap().push(format!("delete {key}"));
            self.data.lock().unwrap().remove(key);
            Ok(())
        }
    }

    async fn map_store(dir: &Path, clock: &Arc<ManualClock>) -> ExpiringStore<MapStore> {
        ExpiringStore::open_map(StoreConfig::new(dir.join("rates.json")), TTL)
            .await
            .unwrap()
            .with_clock(clock.clone())
    }

    #[tokio::test]
    async fn live_then_expired() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = map_store(dir.path(), &clock).await;

        store.insert("rates", Bytes::from("1.0")).await.unwrap();

        clock.advance(TimeDelta::seconds(30));
        assert_eq!(store.retrieve("rates").await.unwrap(), Bytes::from("1.0"));

        clock.advance(TimeDelta::seconds(90));
        assert!(store.retrieve("rates").await.unwrap_err().is_not_found());

        clock.advance(TimeDelta::milliseconds(1));
        assert!(store.retrieve("rates").await.unwrap_err().is_not_found());

        // a remoção em cascata também limpou o store interno
        assert!(store.inner().retrieve("rates").await.unwrap_err().is_not_found());
        assert_eq!(store.expires_at("rates").await, None);
    }

    #[tokio::test]
    async fn expires_exactly_at_ttl() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = map_store(dir.path(), &clock).await;

        store.insert("k", Bytes::from("v")).await.unwrap();
        clock.advance(TimeDelta::seconds(60));
        assert!(store.retrieve("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn reinsert_refreshes_expiry() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = map_store(dir.path(), &clock).await;

        store.insert("k", Bytes::from("v1")).await.unwrap();
        clock.advance(TimeDelta::seconds(45));
        store.insert("k", Bytes::from("v2")).await.unwrap();
        clock.advance(TimeDelta::seconds(45));

        assert_eq!(store.retrieve("k").await.unwrap(), Bytes::from("v2"));
    }

    #[tokio::test]
    async fn key_without_ledger_entry_is_unreachable() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let recording = Arc::new(RecordingStore::default());
        recording.insert("orphan", Bytes::from("x")).await.unwrap();

        let store = ExpiringStore::open(
            recording.clone(),
            StoreConfig::new(dir.path().join("orphan.expiry")),
            TTL,
        )
        .await
        .unwrap()
        .with_clock(clock);

        assert!(store.retrieve("orphan").await.unwrap_err().is_not_found());
        // nunca leu o valor, apenas removeu do store interno
        assert_eq!(recording.calls(), vec!["insert orphan", "delete orphan"]);
    }

    #[tokio::test]
    async fn ledger_failure_blocks_insert() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("ledger");
        let recording = Arc::new(RecordingStore::default());
        let store = ExpiringStore::open(
            recording.clone(),
            StoreConfig::new(sub.join("rates.expiry")),
            TTL,
        )
        .await
        .unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"blocker").unwrap();

        let err = store.insert("k", Bytes::from("v")).await.unwrap_err();
        assert!(matches!(err, CacheError::InsertionFailed { .. }));
        assert!(recording.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_keeps_expired_value_expired() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("ledger");
        let clock = Arc::new(ManualClock::default());
        let recording = Arc::new(RecordingStore::default());
        let store = ExpiringStore::open(
            recording.clone(),
            StoreConfig::new(sub.join("rates.expiry")),
            TTL,
        )
        .await
        .unwrap()
        .with_clock(clock.clone());

        store.insert("k", Bytes::from("v1")).await.unwrap();
        let first_expiry = store.expires_at("k").await;
        clock.advance(TimeDelta::seconds(120));

        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"blocker").unwrap();

        let err = store.insert("k", Bytes::from("v2")).await.err().unwrap();
        assert!(matches!(err, CacheError::InsertionFailed { .. }));
        assert_eq!(store.expires_at("k").await, first_expiry);
        // o valor antigo não volta a ser legível: a limpeza em cascata
        // também esbarra no ledger e o store interno nunca é lido
        assert!(store.retrieve("k").await.is_err());
        assert_eq!(recording.calls(), vec!["insert k"]);
    }

    #[tokio::test]
    async fn ledger_failure_blocks_delete() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("ledger");
        let recording = Arc::new(RecordingStore::default());
        let store = ExpiringStore::open(
            recording.clone(),
            StoreConfig::new(sub.join("rates.expiry")),
            TTL,
        )
        .await
        .unwrap();

        store.insert("k", Bytes::from("v")).await.unwrap();
        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"blocker").unwrap();

        let err = store.delete("k").await.err().unwrap();
        assert!(matches!(err, CacheError::DeletionFailed { .. }));
        assert_eq!(recording.calls(), vec!["insert k"]);
        // a entrada continua no ledger e o valor segue acessível
        assert!(store.expires_at("k").await.is_some());
        assert_eq!(store.retrieve("k").await.unwrap(), Bytes::from("v"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = map_store(dir.path(), &clock).await;

        store.delete("never").await.unwrap();
        store.insert("k", Bytes::from("v")).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.retrieve("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn ledger_survives_restart() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        {
            let store = map_store(dir.path(), &clock).await;
            store.insert("k", Bytes::from("v")).await.unwrap();
        }
        assert!(dir.path().join("rates.json.expiry").exists());

        {
            let store = map_store(dir.path(), &clock).await;
            clock.advance(TimeDelta::seconds(10));
            assert_eq!(store.retrieve("k").await.unwrap(), Bytes::from("v"));
        }

        let store = map_store(dir.path(), &clock).await;
        clock.advance(TimeDelta::seconds(120));
        assert!(store.retrieve("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = map_store(dir.path(), &clock).await;

        store.insert("old1", Bytes::from("a")).await.unwrap();
        store.insert("old2", Bytes::from("b")).await.unwrap();
        clock.advance(TimeDelta::seconds(50));
        store.insert("fresh", Bytes::from("c")).await.unwrap();
        clock.advance(TimeDelta::seconds(20));

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(store.inner().retrieve("old1").await.unwrap_err().is_not_found());
        assert_eq!(store.retrieve("fresh").await.unwrap(), Bytes::from("c"));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn key_locks_are_released() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = map_store(dir.path(), &clock).await;

        store.insert("k", Bytes::from("v")).await.unwrap();
        store.retrieve("k").await.unwrap();
        assert!(store.key_locks.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_operations_keep_ledger_and_store_in_step() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(map_store(dir.path(), &clock).await);

        let mut handles = Vec::new();
        for i in 0..200 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                match i % 3 {
                    0 => store.insert("k", Bytes::from(format!("v{i}"))).await,
                    1 => store.delete("k").await,
                    _ => match store.retrieve("k").await {
                        Err(e) if !e.is_not_found() => Err(e),
                        _ => Ok(()),
                    },
                }
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let in_ledger = store.expires_at("k").await.is_some();
        let in_inner = store.inner().retrieve("k").await.is_ok();
        assert_eq!(in_ledger, in_inner);
        assert!(store.key_locks.locks.is_empty());

        // o mesmo vale para o que ficou no disco
        let reopened = map_store(dir.path(), &clock).await;
        assert_eq!(reopened.expires_at("k").await.is_some(), in_ledger);
        assert_eq!(reopened.inner().retrieve("k").await.is_ok(), in_inner);
    }

    #[tokio::test]
    async fn blob_backed_expiry() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = ExpiringStore::open_blob(StoreConfig::new(dir.path().join("images")), TTL)
            .await
            .unwrap()
            .with_clock(clock.clone());

        store.insert("avatar", Bytes::from("png")).await.unwrap();
        assert!(
            dir.path()
                .join("images")
                .join("imageCacheIndex.json.expiry")
                .exists()
        );
        assert_eq!(store.retrieve("avatar").await.unwrap(), Bytes::from("png"));

        clock.advance(TimeDelta::seconds(61));
        assert!(store.retrieve("avatar").await.unwrap_err().is_not_found());
        assert!(store.inner().retrieve("avatar").await.unwrap_err().is_not_found());
    }
}
