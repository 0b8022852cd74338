use std::ffi::OsString;
use std::path::{Path, PathBuf};

use stormcache_common::{BLOB_INDEX_FILE, EXPIRY_EXTENSION};

use crate::snapshot::FsyncPolicy;

/// Configuração de um store: onde fica o arquivo e como ele é sincronizado.
///
/// Para o `BlobStore`, `path` é o diretório raiz dos blobs.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub fsync: FsyncPolicy,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: FsyncPolicy::default(),
        }
    }

    pub fn with_fsync(mut self, fsync: FsyncPolicy) -> Self {
        self.fsync = fsync;
        self
    }

    /// Configuração do ledger de expiração: `<path>.expiry`, mesma política de fsync.
    pub fn expiry_sidecar(&self) -> StoreConfig {
        StoreConfig {
            path: expiry_path(&self.path),
            fsync: self.fsync,
        }
    }

    /// Caminho do índice quando `path` é a raiz de um `BlobStore`.
    pub fn blob_index_path(&self) -> PathBuf {
        self.path.join(BLOB_INDEX_FILE)
    }
}

/// Acrescenta `.expiry` ao caminho (sem substituir extensão existente).
pub fn expiry_path(primary: &Path) -> PathBuf {
    let mut name = OsString::from(primary.as_os_str());
    name.push(".");
    name.push(EXPIRY_EXTENSION);
    PathBuf::from(name)
}
