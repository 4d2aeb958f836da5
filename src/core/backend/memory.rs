use crate::core::backend::{Backend, BackendReader, BackendWriter, Cursor};
use crate::core::errors::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Volatile backend for tests and throwaway stores.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().recover_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::StoreClosed)
        } else {
            Ok(())
        }
    }
}

impl BackendReader for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.entries.read().recover_poison().get(key).cloned())
    }

    fn cursor(&self) -> Result<Cursor<'_>> {
        self.check_open()?;
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = self
            .entries
            .read()
            .recover_poison()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}

impl BackendWriter for MemoryBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.entries
            .write()
            .recover_poison()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_open()
    }
}

impl Backend for MemoryBackend {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
