//! Persistência por snapshot: cada mutação reescreve o arquivo inteiro.
//!
//! A escrita vai para `<arquivo>.tmp` e só então é renomeada sobre o destino,
//! então um crash no meio da escrita deixa o snapshot anterior intacto.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use stormcache_common::{CacheError, CacheResult, PersistError};

/// Política de fsync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync antes do rename: a operação só conclui com o dado no disco.
    #[default]
    Always,
    /// Sem fsync explícito (deixa pro OS).
    No,
}

/// Lê e desserializa o snapshot em `path`.
///
/// - arquivo inexistente: grava um placeholder vazio e devolve `T::default()`
/// - arquivo ilegível: `LoadFailed`
/// - arquivo que não desserializa: `CorruptFile`
pub async fn load_or_init<T>(path: &Path, fsync: FsyncPolicy) -> CacheResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("snapshot {path:?} não encontrado, iniciando vazio");
            let empty = T::default();
            let bytes = encode(&empty).map_err(|source| CacheError::LoadFailed {
                path: path.to_path_buf(),
                source,
            })?;
            write_atomic(path, &bytes, fsync)
                .await
                .map_err(|e| CacheError::LoadFailed {
                    path: path.to_path_buf(),
                    source: e.into(),
                })?;
            return Ok(empty);
        }
        Err(e) => {
            return Err(CacheError::LoadFailed {
                path: path.to_path_buf(),
                source: e.into(),
            });
        }
    };

    let value = serde_json::from_slice(&data).map_err(|e| CacheError::CorruptFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!("snapshot carregado: {path:?} ({} bytes)", data.len());
    Ok(value)
}

/// Serializa `value` e grava atomicamente em `path`.
pub async fn save_snapshot<T: Serialize>(
    path: &Path,
    value: &T,
    fsync: FsyncPolicy,
) -> CacheResult<()> {
    let bytes = encode(value).map_err(|source| CacheError::SaveFailed {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes, fsync)
        .await
        .map_err(|e| CacheError::SaveFailed {
            path: path.to_path_buf(),
            source: e.into(),
        })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PersistError> {
    serde_json::to_vec(value).map_err(|e| PersistError::Encode(e.to_string()))
}

/// Grava `data` em `path` via arquivo temporário + rename.
/// Cria o diretório pai se necessário.
pub(crate) async fn write_atomic(path: &Path, data: &[u8], fsync: FsyncPolicy) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    if let Err(e) = write_file(&tmp, data, fsync).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn write_file(path: &Path, data: &[u8], fsync: FsyncPolicy) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    if fsync == FsyncPolicy::Always {
        file.sync_all().await?;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    path.with_file_name(name)
}
