use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::keys::{entry_location, LogKey};
use crate::core::lru_cache::LruCache;
use crate::core::page::*;
use crate::core::reference::{load_page, PageReference};
use crate::core::store::StoreShared;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

/// A read-only view of one committed revision.
///
/// Committed pages are immutable, so a reader never coordinates with the
/// writer or with other readers. Loaded pages are cached per handle.
pub struct ReadTransaction {
    shared: Arc<StoreShared>,
    revision: Revision,
    root_indirect: Option<PageReference>,
    root: RevisionRootPage,
    meta: OnceCell<Option<Arc<Page>>>,
    cache: Mutex<LruCache<PageKey, Arc<Page>>>,
    counted: bool,
}

impl ReadTransaction {
    pub(crate) fn open(shared: Arc<StoreShared>, uber: &UberPage, revision: Revision) -> Result<Self> {
        Self::open_view(shared, uber, revision, true)
    }

    /// The committed view a write transaction builds on. It is not counted
    /// as a reader.
    pub(crate) fn open_base(shared: Arc<StoreShared>, uber: &UberPage, revision: Revision) -> Result<Self> {
        Self::open_view(shared, uber, revision, false)
    }

    fn open_view(
        shared: Arc<StoreShared>,
        uber: &UberPage,
        revision: Revision,
        counted: bool,
    ) -> Result<Self> {
        let capacity = shared.options.read_cache_capacity;
        let mut trx = Self {
            shared,
            revision,
            root_indirect: uber.root_indirect.map(PageReference::Unresolved),
            root: RevisionRootPage::new(revision),
            meta: OnceCell::new(),
            cache: Mutex::new(LruCache::new(capacity)),
            counted,
        };
        if counted {
            trx.shared.metrics.reader_opened();
        }

        // Before the first commit there is nothing to load.
        if let Some(key) = uber.root_indirect {
            // every lookup in the root partition starts here
            let root_indirect = trx.load(key)?;
            trx.root_indirect = Some(PageReference::Resident(root_indirect));

            let page = trx
                .committed_page(&LogKey::revision_root(revision))?
                .ok_or_else(|| Error::DataCorruption {
                    details: format!("revision {} has no revision root page", revision),
                })?;
            trx.root = page.as_revision_root()?.clone();
        }
        Ok(trx)
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn next_entry_key(&self) -> u64 {
        self.root.next_entry_key
    }

    pub fn committed_at_millis(&self) -> u64 {
        self.root.committed_at_millis
    }

    /// The page at `address` as of this revision. Addresses nothing was ever
    /// written to resolve to an empty page with the null key.
    pub fn resolve(&self, address: &LogKey) -> Result<Arc<Page>> {
        address.validate()?;
        if address.is_root_partition && address.is_leaf() && address.sequence as u64 > self.revision {
            return Err(Error::RevisionOutOfRange {
                requested: address.sequence as u64,
                latest: self.revision,
            });
        }

        match self.committed_page(address)? {
            Some(page) => Ok(page),
            None => Ok(Arc::new(Page::empty_at(address, NULL_PAGE_KEY, self.revision))),
        }
    }

    pub fn get_entry(&self, key: u64) -> Result<Option<Vec<u8>>> {
        let (address, offset) = entry_location(key)?;
        let page = match self.committed_page(&address)? {
            Some(page) => page,
            None => return Ok(None),
        };
        Ok(page
            .as_node()?
            .entry(offset)
            .and_then(|entry| entry.value())
            .map(|value| value.to_vec()))
    }

    pub fn meta(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let page = match self.meta_page()? {
            Some(page) => page,
            None => return Ok(None),
        };
        Ok(page
            .as_meta()?
            .entry(name)
            .and_then(|entry| entry.value())
            .map(|value| value.to_vec()))
    }

    pub(crate) fn root_page(&self) -> &RevisionRootPage {
        &self.root
    }

    /// Follows the indirect pages from the partition root down to `address`.
    /// `None` when some page on the way has no child in the needed slot.
    pub(crate) fn committed_page(&self, address: &LogKey) -> Result<Option<Arc<Page>>> {
        if address.is_meta() {
            return self.meta_page();
        }

        let start = if address.is_root_partition {
            self.root_indirect.clone()
        } else {
            self.root.node_root.map(PageReference::Unresolved)
        };
        let mut current = match start {
            Some(reference) => reference,
            None => return Ok(None),
        };

        for level in 0..address.level {
            let page = current.resolve(|key| self.load(key))?;
            match page.as_indirect()?.reference(address.child_offset(level)) {
                Some(child) => current = PageReference::Unresolved(child),
                None => return Ok(None),
            }
        }
        current.resolve(|key| self.load(key)).map(Some)
    }

    fn meta_page(&self) -> Result<Option<Arc<Page>>> {
        self.meta
            .get_or_try_init(|| match self.root.meta_root {
                Some(key) => self.load(key).map(Some),
                None => Ok(None),
            })
            .map(|page| page.clone())
    }

    fn load(&self, key: PageKey) -> Result<Arc<Page>> {
        let metrics = &self.shared.metrics;
        if let Some(page) = self.cache.lock().recover_poison().get(&key) {
            metrics.read_cache_hit();
            return Ok(page.clone());
        }
        metrics.read_cache_miss();

        let page = load_page(&*self.shared.backend, key).map_err(|e| {
            if matches!(e, Error::Io(_)) {
                metrics.io_error();
            }
            e
        })?;
        metrics.backend_page_read();

        let page = Arc::new(page);
        self.cache.lock().recover_poison().put(key, page.clone());
        Ok(page)
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        if self.counted {
            self.shared.metrics.reader_closed();
        }
    }
}
