use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::debug;

use stormcache_common::DEFAULT_STORE_PATH;
use stormcache_storage::{
    BlobStore, CacheStore, ExpiringStore, FsyncPolicy, MapStore, StoreConfig, expiry_path,
};

#[derive(Parser, Debug)]
#[command(
    name = "stormcache-cli",
    about = "StormCache: cache chave-valor persistido em arquivo"
)]
struct Args {
    /// Arquivo do store (ou diretório raiz, com --blob)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    path: PathBuf,
    /// Grava cada valor em um arquivo próprio dentro de PATH
    #[arg(long)]
    blob: bool,
    /// TTL em segundos; ativa o ledger de expiração
    #[arg(long, value_name = "SECONDS")]
    ttl: Option<u64>,
    #[arg(long, default_value = "always", value_parser = parse_fsync)]
    fsync: FsyncPolicy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Lê o valor de uma chave
    Get { key: String },
    /// Grava um valor (literal ou conteúdo de arquivo)
    Set {
        key: String,
        #[arg(required_unless_present = "from_file", conflicts_with = "from_file")]
        value: Option<String>,
        #[arg(long, value_name = "FILE")]
        from_file: Option<PathBuf>,
    },
    /// Remove uma chave
    Del { key: String },
    /// Remove todas as chaves expiradas (requer --ttl)
    Purge,
}

fn parse_fsync(s: &str) -> Result<FsyncPolicy, String> {
    match s.to_lowercase().as_str() {
        "always" => Ok(FsyncPolicy::Always),
        "no" => Ok(FsyncPolicy::No),
        _ => Err(format!("valor inválido: '{s}'. Use: always, no")),
    }
}

/// Store aberto conforme as flags.
enum Store {
    Plain(Arc<dyn CacheStore>),
    Expiring(ExpiringStore<Arc<dyn CacheStore>>),
}

impl Store {
    fn as_dyn(&self) -> &dyn CacheStore {
        match self {
            Store::Plain(store) => store.as_ref(),
            Store::Expiring(store) => store,
        }
    }
}

async fn open_store(args: &Args) -> anyhow::Result<Store> {
    let config = StoreConfig::new(&args.path).with_fsync(args.fsync);
    let ledger_path = if args.blob {
        expiry_path(&config.blob_index_path())
    } else {
        expiry_path(&config.path)
    };

    let base: Arc<dyn CacheStore> = if args.blob {
        Arc::new(BlobStore::open(config).await?)
    } else {
        Arc::new(MapStore::open(config).await?)
    };

    match args.ttl {
        Some(secs) => {
            let ledger = StoreConfig::new(ledger_path).with_fsync(args.fsync);
            let store = ExpiringStore::open(base, ledger, Duration::from_secs(secs)).await?;
            Ok(Store::Expiring(store))
        }
        None => Ok(Store::Plain(base)),
    }
}

/// Executa o comando e devolve a saída a ser impressa.
async fn execute(store: &Store, command: Command) -> anyhow::Result<String> {
    match command {
        Command::Get { key } => match store.as_dyn().retrieve(&key).await {
            Ok(value) => Ok(format_value(&value)),
            Err(e) if e.is_not_found() => Ok("(nil)".to_string()),
            Err(e) => Err(e.into()),
        },
        Command::Set {
            key,
            value,
            from_file,
        } => {
            let data = match (value, from_file) {
                (_, Some(file)) => Bytes::from(
                    tokio::fs::read(&file)
                        .await
                        .with_context(|| format!("falha ao ler {file:?}"))?,
                ),
                (Some(value), None) => Bytes::from(value),
                (None, None) => anyhow::bail!("informe um valor ou --from-file"),
            };
            store.as_dyn().insert(&key, data).await?;
            Ok("OK".to_string())
        }
        Command::Del { key } => {
            store.as_dyn().delete(&key).await?;
            Ok("OK".to_string())
        }
        Command::Purge => match store {
            Store::Expiring(store) => Ok(format!("(integer) {}", store.purge_expired().await?)),
            Store::Plain(_) => anyhow::bail!("purge requer --ttl"),
        },
    }
}

/// Formata um valor para exibição humana.
fn format_value(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) => format!("\"{s}\""),
        Err(_) => format!("(binary) {} bytes", data.len()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    debug!("args: {args:?}");

    let store = open_store(&args)
        .await
        .with_context(|| format!("falha ao abrir o store em {:?}", args.path))?;
    let output = execute(&store, args.command).await?;
    println!("{output}");

    Ok(())
}
