use crate::core::codec;
use crate::core::config::now_millis;
use crate::core::constants::*;
use crate::core::container::PageContainer;
use crate::core::errors::*;
use crate::core::keys::{entry_location, LogKey, StorageKey};
use crate::core::page::*;
use crate::core::read_trx::ReadTransaction;
use crate::core::store::{StoreShared, WriterSlot};
use crate::core::transaction_log::TransactionLog;
use log::{debug, error, trace, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// The single open writer of a store, building revision `base + 1`.
///
/// Every page it touches is copied into its transaction log under the page's
/// tree address, together with the committed version it started from. The
/// first touch of an address also assigns the page a fresh durable key and
/// rewires its parent to that key, touching the parent in turn, so the whole
/// path from the uber page down is copied on write.
///
/// Nothing reaches the backend before `commit`. Dropping the handle without
/// committing aborts.
pub struct WriteTransaction {
    shared: Arc<StoreShared>,
    base: ReadTransaction,
    revision: Revision,
    uber: UberPage,
    log: TransactionLog,
    finished: bool,
    _slot: WriterSlot,
}

impl WriteTransaction {
    pub(crate) fn begin(shared: Arc<StoreShared>) -> Result<Self> {
        let slot = WriterSlot::acquire(&shared)?;
        let uber = shared.uber.read().recover_poison().clone();

        // Nothing committed yet: the first transaction builds revision 0.
        let (base_revision, revision) = match uber.root_indirect {
            Some(_) => (uber.revision, uber.revision + 1),
            None => (uber.revision, uber.revision),
        };
        let base = ReadTransaction::open_base(shared.clone(), &uber, base_revision)?;

        let discriminator = shared.next_log_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let log = TransactionLog::open(
            &shared.path.join(TRANSACTION_LOG_DIR),
            discriminator,
            shared.options.log_capacity,
            shared.options.file_permissions,
            shared.metrics.clone(),
        )?;

        let mut trx = Self {
            shared,
            base,
            revision,
            uber,
            log,
            finished: false,
            _slot: slot,
        };
        trx.shared.metrics.writer_begun();

        let successor = RevisionRootPage::successor(trx.base.root_page(), revision);
        *trx.revision_root_mut()? = successor;

        debug!(
            "began write transaction for revision {} (log {})",
            revision,
            trx.log.overflow_path().display()
        );
        Ok(trx)
    }

    /// The revision this transaction will commit as.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn base_revision(&self) -> Revision {
        self.base.revision()
    }

    pub fn overflow_path(&self) -> PathBuf {
        self.log.overflow_path().to_path_buf()
    }

    /// The page at `address` as this transaction sees it: the buffered
    /// modified page if the address was touched, else the committed page.
    pub fn resolve(&mut self, address: &LogKey) -> Result<Page> {
        address.validate()?;
        if address.is_root_partition && address.is_leaf() && address.sequence as u64 > self.revision {
            return Err(Error::RevisionOutOfRange {
                requested: address.sequence as u64,
                latest: self.revision,
            });
        }

        if let Some(container) = self.log.get(address)? {
            return Ok(container.get_modified().clone());
        }
        Ok((*self.base.resolve(address)?).clone())
    }

    /// Buffers the page at `address` for modification and returns its
    /// modified half. Only node pages and the meta page can be written
    /// directly; indirect and revision root pages follow from those.
    pub fn touch_for_write(&mut self, address: &LogKey) -> Result<&mut Page> {
        address.validate()?;
        let writable = address.is_meta() || (!address.is_root_partition && address.is_leaf());
        if !writable {
            return Err(address.invalid());
        }
        self.touch(*address)
    }

    pub fn allocate_entry_key(&mut self) -> Result<u64> {
        let root = self.revision_root_mut()?;
        let key = root.next_entry_key;
        if key >= MAX_ENTRY_KEY {
            return Err(Error::EntryKeyOutOfRange { key });
        }
        root.next_entry_key += 1;
        Ok(key)
    }

    pub fn set_entry(&mut self, key: u64, value: &[u8]) -> Result<()> {
        let (address, offset) = entry_location(key)?;
        self.touch(address)?
            .as_node_mut()?
            .set_entry(offset, Entry::Value(value.to_vec()));

        let root = self.revision_root_mut()?;
        if key >= root.next_entry_key {
            root.next_entry_key = key + 1;
        }
        Ok(())
    }

    pub fn get_entry(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        let (address, offset) = entry_location(key)?;
        if let Some(container) = self.log.get(&address)? {
            return container.node_entry(offset);
        }
        self.base.get_entry(key)
    }

    pub fn remove_entry(&mut self, key: u64) -> Result<()> {
        let (address, offset) = entry_location(key)?;
        self.touch(address)?.as_node_mut()?.set_entry(offset, Entry::Deleted);
        Ok(())
    }

    pub fn set_meta(&mut self, name: &str, value: &[u8]) -> Result<()> {
        self.touch(LogKey::META)?
            .as_meta_mut()?
            .set_entry(name, Entry::Value(value.to_vec()));
        Ok(())
    }

    pub fn get_meta(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        if let Some(container) = self.log.get(&LogKey::META)? {
            return container.meta_entry(name);
        }
        self.base.meta(name)
    }

    pub fn remove_meta(&mut self, name: &str) -> Result<()> {
        self.touch(LogKey::META)?.as_meta_mut()?.set_entry(name, Entry::Deleted);
        Ok(())
    }

    /// Writes every buffered page, syncs, then writes the uber page and syncs
    /// again. Any error before the uber page is written leaves the previous
    /// revision current. `CommitNotDurable` means the uber page was written
    /// and the revision is current, but the last sync failed.
    pub fn commit(mut self) -> Result<Revision> {
        let result = self.write_revision();
        match &result {
            Ok(revision) => {
                self.shared.metrics.commit();
                debug!("committed revision {}", revision);
            }
            Err(Error::CommitNotDurable { revision, details }) => {
                self.shared.metrics.commit();
                warn!("revision {} published without a successful sync: {}", revision, details);
            }
            Err(e) => {
                self.shared.metrics.commit_failed();
                error!("commit of revision {} failed: {}", self.revision, e);
                // keys handed out here may already sit in the backend
                let mut published = self.shared.uber.write().recover_poison();
                if published.page_counter < self.uber.page_counter {
                    published.page_counter = self.uber.page_counter;
                }
            }
        }

        self.finished = true;
        if let Err(e) = self.log.clear() {
            warn!(
                "failed to remove transaction log {}: {}",
                self.log.overflow_path().display(),
                e
            );
        }
        result
    }

    /// Discards every buffered page. The store is left as it was.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.shared.metrics.abort();
        debug!("aborted revision {}", self.revision);
        self.log.clear()
    }

    fn write_revision(&mut self) -> Result<Revision> {
        self.revision_root_mut()?.committed_at_millis = now_millis();

        let backend = self.shared.backend.clone();
        let metrics = self.shared.metrics.clone();
        let mut pages = 0usize;

        for item in self.log.iter_all()? {
            let (address, container) = item?;
            let page = container.merged()?;
            let bytes = codec::encode_page(&page);
            trace!("writing {:?} as page {}", address, page.key);
            backend
                .put(&StorageKey::Page(page.key).encode(), &bytes)
                .map_err(|e| {
                    metrics.io_error();
                    e
                })?;
            metrics.page_written(bytes.len() as u64);
            pages += 1;
        }

        let mut uber = self.uber.clone();
        uber.revision = self.revision;
        let sync = self.shared.options.sync_on_commit;
        if sync {
            backend.sync().map_err(|e| {
                metrics.io_error();
                e
            })?;
        }
        backend
            .put(&StorageKey::UBER_POINTER.encode(), &codec::encode_uber(&uber))
            .map_err(|e| {
                metrics.io_error();
                e
            })?;

        // Once the uber page is in the backend a reopen would find it, so the
        // revision is published whatever the final sync says.
        *self.shared.uber.write().recover_poison() = uber;
        debug!("revision {} published with {} pages", self.revision, pages);

        if sync {
            if let Err(e) = backend.sync() {
                metrics.io_error();
                return Err(Error::CommitNotDurable {
                    revision: self.revision,
                    details: e.to_string(),
                });
            }
        }
        Ok(self.revision)
    }

    fn revision_root_mut(&mut self) -> Result<&mut RevisionRootPage> {
        let address = LogKey::revision_root(self.revision);
        self.touch(address)?.as_revision_root_mut()
    }

    fn touch(&mut self, address: LogKey) -> Result<&mut Page> {
        if self.log.contains(&address)? {
            return self.modified_mut(&address);
        }

        let complete = match self.base.committed_page(&address)? {
            Some(page) => (*page).clone(),
            None => Page::empty_at(&address, NULL_PAGE_KEY, self.base.revision()),
        };
        let mut container = PageContainer::new_from_complete(complete);
        let key = self.uber.allocate_page_key();
        container.get_modified_mut().relocate(key, self.revision);
        trace!("touched {:?} as page {}", address, key);

        self.link(&address, key)?;
        self.log.put(address, container)?;
        self.modified_mut(&address)
    }

    /// Points whatever references `address` at its new key.
    fn link(&mut self, address: &LogKey, key: PageKey) -> Result<()> {
        if address.is_meta() {
            self.revision_root_mut()?.meta_root = Some(key);
        } else if address.level == 0 {
            if address.is_root_partition {
                self.uber.root_indirect = Some(key);
            } else {
                self.revision_root_mut()?.node_root = Some(key);
            }
        } else {
            let parent_level = address.level - 1;
            let offset = address.child_offset(parent_level);
            self.touch(address.ancestor(parent_level))?
                .as_indirect_mut()?
                .set_reference(offset, key);
        }
        Ok(())
    }

    fn modified_mut(&mut self, address: &LogKey) -> Result<&mut Page> {
        self.log
            .get_mut(address)?
            .map(|container| container.get_modified_mut())
            .ok_or_else(|| Error::Other(format!("{:?} missing from transaction log", address)))
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.metrics.abort();
        debug!("write transaction for revision {} dropped, aborting", self.revision);
        if let Err(e) = self.log.clear() {
            warn!(
                "failed to remove transaction log {}: {}",
                self.log.overflow_path().display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::StoreOptions;
    use crate::core::store::PageStore;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> PageStore {
        PageStore::open(dir.path()).unwrap()
    }

    #[test]
    fn test_entries_visible_inside_transaction() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut trx = store.begin_write().unwrap();
        assert_eq!(trx.base_revision(), 0);
        assert_eq!(trx.revision(), 1);

        let key = trx.allocate_entry_key().unwrap();
        assert_eq!(key, 0);
        trx.set_entry(key, b"hello").unwrap();
        assert_eq!(trx.get_entry(key).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(trx.get_entry(key + 1).unwrap(), None);

        trx.remove_entry(key).unwrap();
        assert_eq!(trx.get_entry(key).unwrap(), None);
        trx.abort().unwrap();
    }

    #[test]
    fn test_touch_rejects_structural_addresses() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut trx = store.begin_write().unwrap();

        assert!(matches!(
            trx.touch_for_write(&LogKey::new(false, 2, 0)),
            Err(Error::InvalidAddress { .. })
        ));
        assert!(matches!(
            trx.touch_for_write(&LogKey::revision_root(1)),
            Err(Error::InvalidAddress { .. })
        ));
        assert!(matches!(
            trx.touch_for_write(&LogKey::node_page(MAX_LEAF_SEQUENCE)),
            Err(Error::InvalidAddress { .. })
        ));
        assert!(trx.touch_for_write(&LogKey::node_page(0)).is_ok());
        assert!(trx.touch_for_write(&LogKey::META).is_ok());
    }

    #[test]
    fn test_touch_assigns_fresh_keys_and_links_parents() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut trx = store.begin_write().unwrap();

        let address = LogKey::node_page(130);
        let key = trx.touch_for_write(&address).unwrap().key;
        assert_ne!(key, NULL_PAGE_KEY);
        // touching again returns the same buffered page
        assert_eq!(trx.touch_for_write(&address).unwrap().key, key);

        let parent = trx.resolve(&address.ancestor(3)).unwrap();
        assert_eq!(
            parent.as_indirect().unwrap().reference(address.child_offset(3)),
            Some(key)
        );

        let root = trx.resolve(&LogKey::revision_root(1)).unwrap();
        let node_root = root.as_revision_root().unwrap().node_root;
        assert_eq!(node_root, Some(trx.resolve(&address.ancestor(0)).unwrap().key));
    }

    #[test]
    fn test_resolve_bounds() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut trx = store.begin_write().unwrap();

        assert!(matches!(
            trx.resolve(&LogKey::revision_root(2)),
            Err(Error::RevisionOutOfRange { requested: 2, latest: 1 })
        ));
        assert!(matches!(
            trx.resolve(&LogKey::UBER_POINTER),
            Err(Error::InvalidAddress { .. })
        ));

        // untouched, never written page resolves empty
        let page = trx.resolve(&LogKey::node_page(55)).unwrap();
        assert_eq!(page.key, NULL_PAGE_KEY);
        assert!(page.as_node().unwrap().is_empty());
    }

    #[test]
    fn test_meta_entries() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut trx = store.begin_write().unwrap();
        trx.set_meta("name", b"pages").unwrap();
        trx.set_meta("owner", b"ops").unwrap();
        assert_eq!(trx.get_meta("name").unwrap(), Some(b"pages".to_vec()));
        trx.commit().unwrap();

        let mut trx = store.begin_write().unwrap();
        assert_eq!(trx.get_meta("owner").unwrap(), Some(b"ops".to_vec()));
        trx.remove_meta("owner").unwrap();
        assert_eq!(trx.get_meta("owner").unwrap(), None);
        assert_eq!(trx.get_meta("name").unwrap(), Some(b"pages".to_vec()));
        trx.commit().unwrap();

        let reader = store.begin_read(2).unwrap();
        assert_eq!(reader.meta("name").unwrap(), Some(b"pages".to_vec()));
        assert_eq!(reader.meta("owner").unwrap(), None);
        assert_eq!(store.begin_read(1).unwrap().meta("owner").unwrap(), Some(b"ops".to_vec()));
    }

    #[test]
    fn test_set_entry_advances_entry_key_counter() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut trx = store.begin_write().unwrap();
        trx.set_entry(500, b"x").unwrap();
        assert_eq!(trx.allocate_entry_key().unwrap(), 501);
        assert!(matches!(
            trx.set_entry(MAX_ENTRY_KEY, b"x"),
            Err(Error::EntryKeyOutOfRange { .. })
        ));
        trx.commit().unwrap();
        assert_eq!(store.begin_read_latest().unwrap().next_entry_key(), 502);
    }

    #[test]
    fn test_small_log_spills_and_still_commits() {
        let dir = TempDir::new().unwrap();
        let options = StoreOptions {
            log_capacity: 4,
            ..StoreOptions::default()
        };
        let store = PageStore::open_with_options(dir.path(), options).unwrap();

        let mut trx = store.begin_write().unwrap();
        for key in 0..40u64 {
            trx.set_entry(key * 128, format!("value {}", key).as_bytes()).unwrap();
        }
        trx.commit().unwrap();

        assert!(store.metrics().log_spills > 0);
        let reader = store.begin_read(1).unwrap();
        for key in 0..40u64 {
            assert_eq!(
                reader.get_entry(key * 128).unwrap(),
                Some(format!("value {}", key).into_bytes())
            );
        }
    }

    #[test]
    fn test_drop_releases_writer_slot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let overflow;
        {
            let mut trx = store.begin_write().unwrap();
            trx.set_entry(1, b"discarded").unwrap();
            overflow = trx.overflow_path();
            assert!(store.is_writer_active());
        }
        assert!(!store.is_writer_active());
        assert!(!overflow.exists());
        assert_eq!(store.latest_revision(), 0);
        assert_eq!(store.metrics().aborts, 1);
    }
}
