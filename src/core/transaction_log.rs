use crate::core::container::PageContainer;
use crate::core::errors::*;
use crate::core::keys::LogKey;
use crate::core::lru_cache::LruCache;
use crate::core::metrics::Metrics;
use crate::core::overflow_log::{OverflowIter, PersistentLog};
use log::trace;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Buffer of every page a write transaction has touched.
///
/// Tier 1 is a bounded LRU map held in memory; whatever it evicts is written
/// to tier 2, the transaction's private `PersistentLog`. Tier 2 is a superset
/// of everything ever evicted and may hold stale copies of keys that were
/// promoted back into tier 1, so tier 1 always wins.
///
/// Single caller only; the owning write transaction provides exclusivity.
pub struct TransactionLog {
    memory: LruCache<LogKey, PageContainer>,
    overflow: PersistentLog,
    metrics: Arc<Metrics>,
    closed: bool,
}

impl TransactionLog {
    pub fn new(overflow: PersistentLog, capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            memory: LruCache::new(capacity),
            overflow,
            metrics,
            closed: false,
        }
    }

    /// Opens a fresh overflow tier at `<base>/<discriminator>`.
    pub fn open(
        base: &Path,
        discriminator: u64,
        capacity: usize,
        permissions: u32,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let overflow = PersistentLog::open(base, discriminator, permissions)?;
        Ok(Self::new(overflow, capacity, metrics))
    }

    pub fn get(&mut self, key: &LogKey) -> Result<Option<&PageContainer>> {
        if !self.promote(key)? {
            return Ok(None);
        }
        Ok(self.memory.get(key))
    }

    pub fn get_mut(&mut self, key: &LogKey) -> Result<Option<&mut PageContainer>> {
        if !self.promote(key)? {
            return Ok(None);
        }
        Ok(self.memory.get_mut(key))
    }

    pub fn contains(&mut self, key: &LogKey) -> Result<bool> {
        self.promote(key)
    }

    pub fn put(&mut self, key: LogKey, container: PageContainer) -> Result<()> {
        self.check_open()?;
        if let Some((evicted_key, evicted)) = self.memory.put(key, container) {
            trace!("spilling {:?} to overflow log", evicted_key);
            self.overflow.put(&evicted_key, &evicted)?;
            self.metrics.log_spill();
        }
        Ok(())
    }

    /// Drops tier 1, then deletes tier 2. Tier 1 is empty even when deleting
    /// tier 2 fails.
    pub fn clear(&mut self) -> Result<()> {
        self.closed = true;
        self.memory.clear();
        self.overflow.clear()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Every buffered container exactly once: tier 1 first, then whatever
    /// tier 2 holds for keys not in tier 1.
    pub fn iter_all(&self) -> Result<LogIterator<'_>> {
        self.check_open()?;
        let memory: Vec<(LogKey, PageContainer)> = self
            .memory
            .iter()
            .map(|(key, container)| (*key, container.clone()))
            .collect();
        let resident = memory.iter().map(|(key, _)| *key).collect();

        Ok(LogIterator {
            state: IterState::Memory(memory.into_iter()),
            resident,
            overflow: &self.overflow,
        })
    }

    pub fn is_resident(&self, key: &LogKey) -> bool {
        self.memory.contains(key)
    }

    pub fn resident_len(&self) -> usize {
        self.memory.len()
    }

    pub fn overflow(&self) -> &PersistentLog {
        &self.overflow
    }

    pub fn overflow_path(&self) -> &Path {
        self.overflow.path()
    }

    /// Makes sure `key` sits in tier 1 if it is buffered at all.
    fn promote(&mut self, key: &LogKey) -> Result<bool> {
        self.check_open()?;
        if self.memory.contains(key) {
            self.metrics.log_memory_hit();
            return Ok(true);
        }
        match self.overflow.get(key)? {
            Some(container) => {
                trace!("promoting {:?} from overflow log", key);
                self.metrics.log_overflow_hit();
                self.put(*key, container)?;
                Ok(true)
            }
            None => {
                self.metrics.log_miss();
                Ok(false)
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::LogClosed)
        } else {
            Ok(())
        }
    }
}

enum IterState<'a> {
    Memory(std::vec::IntoIter<(LogKey, PageContainer)>),
    Overflow(OverflowIter<'a>),
    Done,
}

/// One-shot iterator over a transaction log, see `TransactionLog::iter_all`.
pub struct LogIterator<'a> {
    state: IterState<'a>,
    resident: HashSet<LogKey>,
    overflow: &'a PersistentLog,
}

impl<'a> Iterator for LogIterator<'a> {
    type Item = Result<(LogKey, PageContainer)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                IterState::Memory(entries) => {
                    if let Some(entry) = entries.next() {
                        return Some(Ok(entry));
                    }
                    match self.overflow.iter() {
                        Ok(cursor) => self.state = IterState::Overflow(cursor),
                        Err(e) => {
                            self.state = IterState::Done;
                            return Some(Err(e));
                        }
                    }
                }
                IterState::Overflow(cursor) => match cursor.next() {
                    Some(Ok((key, _))) if self.resident.contains(&key) => continue,
                    Some(item) => return Some(item),
                    None => self.state = IterState::Done,
                },
                IterState::Done => return None,
            }
        }
    }
}
