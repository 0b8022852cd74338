use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use stormcache_common::{CacheError, CacheResult, DEFAULT_QUEUE_CAPACITY};

use crate::config::StoreConfig;
use crate::map_store::MapState;
use crate::store::CacheStore;

type Reply<T> = oneshot::Sender<CacheResult<T>>;

/// Mensagem processada pelo worker.
#[derive(Debug)]
enum Request {
    Load {
        reply: Reply<()>,
    },
    Insert {
        key: String,
        value: Bytes,
        reply: Reply<()>,
    },
    Retrieve {
        key: String,
        reply: Reply<Bytes>,
    },
    Delete {
        key: String,
        reply: Reply<()>,
    },
}

/// Worker dono exclusivo do mapa: recebe requisições via channel e as
/// executa estritamente na ordem de chegada.
pub struct StoreWorker {
    rx: mpsc::Receiver<Request>,
    state: MapState,
}

impl StoreWorker {
    fn new(rx: mpsc::Receiver<Request>, config: &StoreConfig) -> Self {
        Self {
            rx,
            state: MapState::new(config),
        }
    }

    /// Loop principal: termina quando todos os handles são descartados.
    pub async fn run(mut self) {
        info!("store worker iniciado: {:?}", self.state.path());

        while let Some(request) = self.rx.recv().await {
            self.handle(request).await;
        }

        info!("store worker encerrado: {:?}", self.state.path());
    }

    async fn handle(&mut self, request: Request) {
        // Se o chamador desistiu da resposta, o resultado é descartado.
        match request {
            Request::Load { reply } => {
                let _ = reply.send(self.state.ensure_loaded().await);
            }
            Request::Insert { key, value, reply } => {
                let _ = reply.send(self.state.insert(&key, value).await);
            }
            Request::Retrieve { key, reply } => {
                let result = match self.state.ensure_loaded().await {
                    Ok(()) => self.state.get(&key),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::Delete { key, reply } => {
                let _ = reply.send(self.state.delete(&key).await);
            }
        }
    }
}

/// Handle para um store isolado em um único worker.
#[derive(Debug, Clone)]
pub struct ActorMapStore {
    tx: mpsc::Sender<Request>,
}

impl ActorMapStore {
    /// Cria o worker em background; o arquivo é carregado na primeira requisição.
    pub fn spawn(config: StoreConfig) -> Self {
        let (store, worker) = create_actor_store(config, DEFAULT_QUEUE_CAPACITY);
        tokio::spawn(worker.run());
        store
    }

    /// Cria o worker e aguarda o carregamento do arquivo.
    pub async fn open(config: StoreConfig) -> CacheResult<Self> {
        let store = Self::spawn(config);
        store.load().await?;
        Ok(store)
    }

    /// Força o carregamento do arquivo (no-op se já carregado).
    pub async fn load(&self) -> CacheResult<()> {
        self.call(|reply| Request::Load { reply }).await
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> CacheResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(request(reply))
            .await
            .map_err(|_| CacheError::Closed)?;
        rx.await.map_err(|_| CacheError::Closed)?
    }
}

/// Cria um par (handle, worker). O chamador decide onde rodar o worker.
pub fn create_actor_store(config: StoreConfig, buffer_size: usize) -> (ActorMapStore, StoreWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let worker = StoreWorker::new(rx, &config);
    debug!("actor store criado: {:?}", config.path);
    (ActorMapStore { tx }, worker)
}

#[async_trait]
impl CacheStore for ActorMapStore {
    async fn insert(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let key = key.to_string();
        self.call(|reply| Request::Insert { key, value, reply }).await
    }

    async fn retrieve(&self, key: &str) -> CacheResult<Bytes> {
        let key = key.to_string();
        self.call(|reply| Request::Retrieve { key, reply }).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        self.call(|reply| Request::Delete { key, reply }).await
    }
}
