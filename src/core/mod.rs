pub mod constants;
pub mod errors;
pub mod keys;
pub mod page;
pub mod codec;
pub mod container;
pub mod reference;
pub mod backend;
pub mod lru_cache;
pub mod overflow_log;
pub mod transaction_log;
pub mod read_trx;
pub mod write_trx;
pub mod store;
pub mod config;
pub mod metrics;

pub use constants::*;
pub use keys::{LogKey, StorageKey};
pub use page::{Entry, IndirectPage, MetaPage, NodePage, Page, PageBody, RevisionRootPage, UberPage};
pub use container::PageContainer;
pub use reference::PageReference;
pub use backend::{Backend, BackendReader, BackendWriter, Cursor, FileBackend, MemoryBackend};
pub use lru_cache::LruCache;
pub use overflow_log::PersistentLog;
pub use transaction_log::{LogIterator, TransactionLog};
pub use read_trx::ReadTransaction;
pub use write_trx::WriteTransaction;
pub use store::PageStore;
pub use config::{StoreManifest, StoreOptions};
pub use metrics::{Metrics, MetricsSnapshot};
