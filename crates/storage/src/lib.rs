#![forbid(unsafe_code)]

mod actor;
mod blob;
mod clock;
mod config;
mod entry;
mod expiring;
mod ledger;
mod map_store;
pub mod snapshot;
mod store;
mod typed;

pub use actor::{ActorMapStore, StoreWorker, create_actor_store};
pub use blob::BlobStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StoreConfig, expiry_path};
pub use entry::{CacheMap, Value};
pub use expiring::ExpiringStore;
pub use ledger::{ExpiryLedger, LedgerStatus};
pub use map_store::MapStore;
pub use snapshot::FsyncPolicy;
pub use store::CacheStore;
pub use typed::TypedCache;

pub use stormcache_common::{CacheError, CacheResult, PersistError};
