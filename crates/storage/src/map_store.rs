use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, info};

use stormcache_common::{CacheError, CacheResult};

use crate::config::StoreConfig;
use crate::entry::{CacheMap, Value};
use crate::snapshot::{self, FsyncPolicy};
use crate::store::CacheStore;

/// Mapa em memória + arquivo de suporte. Compartilhado pelo `MapStore`
/// (atrás de um RwLock) e pelo worker do `ActorMapStore`.
#[derive(Debug)]
pub(crate) struct MapState {
    path: PathBuf,
    fsync: FsyncPolicy,
    map: CacheMap,
    loaded: bool,
}

impl MapState {
    pub(crate) fn new(config: &StoreConfig) -> Self {
        Self {
            path: config.path.clone(),
            fsync: config.fsync,
            map: CacheMap::new(),
            loaded: false,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Carrega o arquivo na primeira chamada; nas seguintes não toca o disco.
    pub(crate) async fn ensure_loaded(&mut self) -> CacheResult<()> {
        if self.loaded {
            return Ok(());
        }
        self.map = snapshot::load_or_init(&self.path, self.fsync).await?;
        self.loaded = true;
        info!("store carregado: {:?} ({} chaves)", self.path, self.map.len());
        Ok(())
    }

    /// Só válido depois de `ensure_loaded`.
    pub(crate) fn get(&self, key: &str) -> CacheResult<Bytes> {
        self.map
            .get(key)
            .map(|value| value.clone().into_bytes())
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Aplica em memória e reescreve o arquivo. Falha na escrita não desfaz
    /// a mutação: memória e disco divergem até a próxima escrita bem-sucedida.
    pub(crate) async fn insert(&mut self, key: &str, value: Bytes) -> CacheResult<()> {
        self.ensure_loaded().await?;
        self.map.insert(key.to_string(), Value::from(value));
        self.persist().await?;
        debug!("insert: {key}");
        Ok(())
    }

    pub(crate) async fn delete(&mut self, key: &str) -> CacheResult<()> {
        self.ensure_loaded().await?;
        self.map.remove(key);
        self.persist().await?;
        debug!("delete: {key}");
        Ok(())
    }

    async fn persist(&self) -> CacheResult<()> {
        snapshot::save_snapshot(&self.path, &self.map, self.fsync).await
    }
}

/// Store chave-valor persistido em um único arquivo JSON.
///
/// `retrieve` usa o lock de leitura (leitores não bloqueiam leitores);
/// `insert`/`delete` seguram o lock de escrita durante a mutação e a
/// gravação do arquivo, então as escritas seguem uma ordem total.
#[derive(Debug)]
pub struct MapStore {
    state: RwLock<MapState>,
}

impl MapStore {
    /// Cria o store sem tocar o disco; o arquivo é carregado na primeira operação.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(MapState::new(&config)),
        }
    }

    /// Cria o store e carrega o arquivo imediatamente.
    /// Arquivo corrompido resulta em `CorruptFile`.
    pub async fn open(config: StoreConfig) -> CacheResult<Self> {
        let store = Self::new(config);
        store.state.write().await.ensure_loaded().await?;
        Ok(store)
    }
}

#[async_trait]
impl CacheStore for MapStore {
    async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()> {
        self.state.write().await.insert(key, value).await
    }

    async fn retrieve(&self, key: &str) -> CacheResult<Bytes> {
        {
            let state = self.state.read().await;
            if state.is_loaded() {
                return state.get(key);
            }
        }

        // Caminho lazy: outro chamador pode ter carregado enquanto esperávamos.
        let mut state = self.state.write().await;
        state.ensure_loaded().await?;
        state.get(key)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.state.write().await.delete(key).await
    }
}
