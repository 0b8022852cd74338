use std::path::PathBuf;

/// Causa de uma falha na fronteira de persistência (leitura/escrita/serialização).
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialização: {0}")]
    Encode(String),
}

/// Erros do cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Chave ausente ou expirada. Esperado, não é anomalia.
    #[error("chave não encontrada: {key}")]
    NotFound { key: String },
    #[error("falha ao salvar {path:?}: {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: PersistError,
    },
    #[error("falha ao carregar {path:?}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: PersistError,
    },
    /// O arquivo existe mas não desserializa. Separado de `LoadFailed`
    /// para o chamador decidir entre descartar e reinicializar ou abortar.
    #[error("arquivo corrompido {path:?}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },
    #[error("falha na inserção de '{key}'")]
    InsertionFailed {
        key: String,
        #[source]
        source: Box<CacheError>,
    },
    #[error("falha na remoção de '{key}'")]
    DeletionFailed {
        key: String,
        #[source]
        source: Box<CacheError>,
    },
    #[error("codec: {0}")]
    Codec(String),
    #[error("store encerrado")]
    Closed,
}

impl CacheError {
    pub fn not_found(key: impl Into<String>) -> Self {
        CacheError::NotFound { key: key.into() }
    }

    pub fn insertion(key: impl Into<String>, source: CacheError) -> Self {
        CacheError::InsertionFailed {
            key: key.into(),
            source: Box::new(source),
        }
    }

    pub fn deletion(key: impl Into<String>, source: CacheError) -> Self {
        CacheError::DeletionFailed {
            key: key.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    /// `true` se o erro (ou a causa embrulhada por insert/delete) é `CorruptFile`.
    pub fn is_corrupt(&self) -> bool {
        match self {
            CacheError::CorruptFile { .. } => true,
            CacheError::InsertionFailed { source, .. }
            | CacheError::DeletionFailed { source, .. } => source.is_corrupt(),
            _ => false,
        }
    }
}

/// Result type alias.
pub type CacheResult<T> = Result<T, CacheError>;
