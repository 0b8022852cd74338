use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use stormcache_common::CacheResult;

use crate::config::StoreConfig;
use crate::snapshot::{self, FsyncPolicy};

/// Estado de uma chave no ledger em um dado instante.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Sem entrada: a chave é inalcançável pelo `ExpiringStore`.
    Missing,
    Live(DateTime<Utc>),
    Expired(DateTime<Utc>),
}

/// Mapa chave → instante de expiração, persistido no arquivo sidecar.
///
/// Os instantes são gravados em RFC 3339 com nanossegundos, então
/// sobrevivem à ida e volta do disco sem perda.
#[derive(Debug)]
pub struct ExpiryLedger {
    path: PathBuf,
    fsync: FsyncPolicy,
    expiries: HashMap<String, DateTime<Utc>>,
}

impl ExpiryLedger {
    /// Carrega o ledger (arquivo inexistente → ledger vazio).
    pub async fn open(config: StoreConfig) -> CacheResult<Self> {
        let expiries: HashMap<String, DateTime<Utc>> =
            snapshot::load_or_init(&config.path, config.fsync).await?;
        info!(
            "ledger de expiração carregado: {:?} ({} chaves)",
            config.path,
            expiries.len()
        );
        Ok(Self {
            path: config.path,
            fsync: config.fsync,
            expiries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }

    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.expiries.get(key).copied()
    }

    /// Expirada quando `now` alcança ou passa o instante gravado.
    pub fn status(&self, key: &str, now: DateTime<Utc>) -> LedgerStatus {
        match self.expiries.get(key) {
            None => LedgerStatus::Missing,
            Some(&at) if now >= at => LedgerStatus::Expired(at),
            Some(&at) => LedgerStatus::Live(at),
        }
    }

    /// Grava o instante de `key`. Retorna o instante anterior, se havia.
    pub fn set(&mut self, key: &str, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiries.insert(key.to_string(), at)
    }

    /// Remove a entrada, devolvendo o instante que existia.
    pub fn remove(&mut self, key: &str) -> Option<DateTime<Utc>> {
        self.expiries.remove(key)
    }

    /// Volta `key` ao estado anterior a um `set`/`remove` que não foi gravado.
    pub fn restore(&mut self, key: &str, previous: Option<DateTime<Utc>>) {
        match previous {
            Some(at) => {
                self.expiries.insert(key.to_string(), at);
            }
            None => {
                self.expiries.remove(key);
            }
        }
    }

    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.expiries
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn save(&self) -> CacheResult<()> {
        snapshot::save_snapshot(&self.path, &self.expiries, self.fsync).await
    }
}
