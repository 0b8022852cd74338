//! Store de blobs: cada valor vira um arquivo próprio dentro do diretório
//! raiz, e o índice (`imageCacheIndex.json`) guarda só chave → nome do arquivo.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use stormcache_common::{CacheError, CacheResult};

use crate::config::StoreConfig;
use crate::snapshot::{self, FsyncPolicy};
use crate::store::CacheStore;

/// Chave → nome do arquivo (relativo à raiz).
type BlobIndex = HashMap<String, String>;

#[derive(Debug)]
struct IndexState {
    entries: BlobIndex,
    loaded: bool,
}

/// Store onde o valor em memória é uma referência para um arquivo em disco.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    index_path: PathBuf,
    fsync: FsyncPolicy,
    index: RwLock<IndexState>,
}

impl BlobStore {
    /// Cria o store sem tocar o disco; o índice é carregado na primeira operação.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            index_path: config.blob_index_path(),
            root: config.path,
            fsync: config.fsync,
            index: RwLock::new(IndexState {
                entries: BlobIndex::new(),
                loaded: false,
            }),
        }
    }

    /// Cria o store e carrega o índice imediatamente.
    pub async fn open(config: StoreConfig) -> CacheResult<Self> {
        let store = Self::new(config);
        {
            let mut index = store.index.write().await;
            store.ensure_loaded(&mut index).await?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Nome do arquivo de uma chave: SHA-256 em hex, seguro para qualquer chave.
    pub fn blob_file_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn ensure_loaded(&self, index: &mut IndexState) -> CacheResult<()> {
        if index.loaded {
            return Ok(());
        }
        index.entries = snapshot::load_or_init(&self.index_path, self.fsync).await?;
        index.loaded = true;
        info!(
            "índice de blobs carregado: {:?} ({} entradas)",
            self.index_path,
            index.entries.len()
        );
        Ok(())
    }

    async fn persist(&self, index: &IndexState) -> CacheResult<()> {
        snapshot::save_snapshot(&self.index_path, &index.entries, self.fsync).await
    }

    /// Remove um arquivo que o índice deixou de referenciar. Falha só é logada:
    /// o insert que o substituiu já foi gravado.
    async fn remove_orphan(&self, file_name: &str) {
        let path = self.root.join(file_name);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("blob órfão removido: {path:?}"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("não foi possível remover blob órfão {path:?}: {e}"),
        }
    }

    /// Lê o blob referenciado. Arquivo ausente ou ilegível vira `NotFound`:
    /// o índice pode apontar para um arquivo removido por fora.
    async fn read_blob(&self, index: &IndexState, key: &str) -> CacheResult<Bytes> {
        let Some(file_name) = index.entries.get(key) else {
            return Err(CacheError::not_found(key));
        };

        let path = self.root.join(file_name);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) => {
                warn!("blob de '{key}' ilegível em {path:?}: {e}");
                Err(CacheError::not_found(key))
            }
        }
    }
}

#[async_trait]
impl CacheStore for BlobStore {
    async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let mut index = self.index.write().await;
        self.ensure_loaded(&mut index).await?;

        // blob primeiro: o índice nunca aponta para um arquivo incompleto
        let file_name = Self::blob_file_name(key);
        let path = self.root.join(&file_name);
        snapshot::write_atomic(&path, &value, self.fsync)
            .await
            .map_err(|e| {
                CacheError::insertion(
                    key,
                    CacheError::SaveFailed {
                        path: path.clone(),
                        source: e.into(),
                    },
                )
            })?;

        let previous = index.entries.insert(key.to_string(), file_name.clone());
        self.persist(&index).await?;

        // índice gravado por versões antigas pode apontar para outro arquivo
        if let Some(old) = previous.filter(|old| *old != file_name) {
            self.remove_orphan(&old).await;
        }
        debug!("blob gravado: {key} ({} bytes)", value.len());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> CacheResult<Bytes> {
        {
            let index = self.index.read().await;
            if index.loaded {
                return self.read_blob(&index, key).await;
            }
        }

        let mut index = self.index.write().await;
        self.ensure_loaded(&mut index).await?;
        self.read_blob(&index, key).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut index = self.index.write().await;
        self.ensure_loaded(&mut index).await?;

        let file_name = index
            .entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| Self::blob_file_name(key));
        let path = self.root.join(&file_name);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::deletion(
                    key,
                    CacheError::SaveFailed {
                        path,
                        source: e.into(),
                    },
                ));
            }
        }

        index.entries.remove(key);
        self.persist(&index).await?;
        debug!("blob removido: {key}");
        Ok(())
    }
}
