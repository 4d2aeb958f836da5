//! Ordered key/value storage underneath the page store and the overflow log.
//!
//! The store only ever needs point reads, appends of new keys (plus the one
//! overwritten uber pointer) and a forward scan, so the capability surface is
//! split into a reader half and a writer half.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::core::errors::*;

/// Forward, one-shot cursor over `(key, value)` pairs in ascending key order.
pub type Cursor<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>;

pub trait BackendReader: Send + Sync {
    /// A missing key is `Ok(None)`, never an error.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn cursor(&self) -> Result<Cursor<'_>>;
}

pub trait BackendWriter: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Makes every preceding `put` durable.
    fn sync(&self) -> Result<()>;
}

pub trait Backend: BackendReader + BackendWriter {
    /// Releases the underlying resources. Later calls fail with `StoreClosed`.
    fn close(&self) -> Result<()>;
}
