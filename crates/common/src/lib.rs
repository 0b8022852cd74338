#![forbid(unsafe_code)]

mod error;

pub use error::*;

/// Extensão acrescentada ao caminho primário para o ledger de expiração.
pub const EXPIRY_EXTENSION: &str = "expiry";
/// Nome do arquivo de índice dentro do diretório de blobs.
pub const BLOB_INDEX_FILE: &str = "imageCacheIndex.json";
pub const DEFAULT_STORE_PATH: &str = "stormcache.json";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
