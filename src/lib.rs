pub mod core;

pub use crate::core::{
    Entry, LogKey, Page, PageBody, PageContainer, PageKey, PageReference, PageStore,
    ReadTransaction, Revision, StoreOptions, WriteTransaction,
};
pub use crate::core::backend::{Backend, BackendReader, BackendWriter, FileBackend, MemoryBackend};
pub use crate::core::errors::{Error, Result};
pub use crate::core::metrics::MetricsSnapshot;
