use crate::core::backend::{Backend, FileBackend};
use crate::core::codec;
use crate::core::config::{StoreManifest, StoreOptions};
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::keys::StorageKey;
use crate::core::metrics::{Metrics, MetricsSnapshot};
use crate::core::page::UberPage;
use crate::core::read_trx::ReadTransaction;
use crate::core::write_trx::WriteTransaction;
use fs2::FileExt;
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// State every handle of one store shares.
pub(crate) struct StoreShared {
    pub(crate) path: PathBuf,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) options: StoreOptions,
    /// Latest published uber page. Replaced only after it is durable.
    pub(crate) uber: RwLock<UberPage>,
    pub(crate) writer_active: AtomicBool,
    /// Discriminator for the next transaction log directory.
    pub(crate) next_log_id: AtomicU64,
    pub(crate) metrics: Arc<Metrics>,
    _lock_file: File,
}

/// Holds the store's single writer slot until dropped.
pub(crate) struct WriterSlot {
    shared: Arc<StoreShared>,
}

impl WriterSlot {
    pub(crate) fn acquire(shared: &Arc<StoreShared>) -> Result<Self> {
        shared
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::WriterActive)?;
        Ok(Self {
            shared: shared.clone(),
        })
    }
}

impl Drop for WriterSlot {
    fn drop(&mut self) {
        self.shared.writer_active.store(false, Ordering::Release);
    }
}

/// A directory holding an append-only page file and the chain of committed
/// revisions stored in it.
///
/// Any number of `ReadTransaction`s can be open at once, each pinned to one
/// committed revision. At most one `WriteTransaction` is open at a time; it
/// builds the next revision and publishes it on commit.
pub struct PageStore {
    shared: Arc<StoreShared>,
}

impl PageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let lock_file = prepare_directory(path, &options)?;
        let backend = FileBackend::open(path, PAGES_FILE, options.file_permissions)?;
        Self::assemble(path, lock_file, Arc::new(backend), options)
    }

    /// Opens a store whose committed pages live in `backend` instead of the
    /// page file. `path` still hosts the lock, the manifest and the
    /// transaction logs.
    pub fn open_with_backend<P: AsRef<Path>>(
        path: P,
        backend: Arc<dyn Backend>,
        options: StoreOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let lock_file = prepare_directory(path, &options)?;
        Self::assemble(path, lock_file, backend, options)
    }

    fn assemble(
        path: &Path,
        lock_file: File,
        backend: Arc<dyn Backend>,
        options: StoreOptions,
    ) -> Result<Self> {
        let published = match backend.get(&StorageKey::UBER_POINTER.encode())? {
            Some(bytes) => Some(codec::decode_uber(&bytes)?),
            None => None,
        };

        let shared = Arc::new(StoreShared {
            path: path.to_path_buf(),
            backend,
            options,
            uber: RwLock::new(published.clone().unwrap_or_else(UberPage::bootstrap)),
            writer_active: AtomicBool::new(false),
            next_log_id: AtomicU64::new(0),
            metrics: Arc::new(Metrics::new()),
            _lock_file: lock_file,
        });
        let store = PageStore { shared };

        match published {
            Some(uber) => info!(
                "opened store at {} at revision {} ({} pages allocated)",
                path.display(),
                uber.revision,
                uber.page_counter - FIRST_PAGE_KEY
            ),
            None => {
                let revision = store.begin_write()?.commit()?;
                info!("created store at {} with empty revision {}", path.display(), revision);
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    pub fn latest_revision(&self) -> Revision {
        self.shared.uber.read().recover_poison().revision
    }

    pub fn begin_read(&self, revision: Revision) -> Result<ReadTransaction> {
        let uber = self.shared.uber.read().recover_poison().clone();
        if revision > uber.revision {
            return Err(Error::RevisionOutOfRange {
                requested: revision,
                latest: uber.revision,
            });
        }
        ReadTransaction::open(self.shared.clone(), &uber, revision)
    }

    pub fn begin_read_latest(&self) -> Result<ReadTransaction> {
        let uber = self.shared.uber.read().recover_poison().clone();
        ReadTransaction::open(self.shared.clone(), &uber, uber.revision)
    }

    /// Fails with `WriterActive` while another write transaction is open.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        WriteTransaction::begin(self.shared.clone())
    }

    pub fn is_writer_active(&self) -> bool {
        self.shared.writer_active.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// Creates the directory, takes the exclusive lock, checks the manifest and
/// removes transaction logs a crashed process left behind.
#[cfg_attr(not(unix), allow(unused_variables))]
fn prepare_directory(path: &Path, options: &StoreOptions) -> Result<File> {
    if path.as_os_str().is_empty() {
        return Err(Error::Other("store path cannot be empty".to_string()));
    }
    fs::create_dir_all(path).map_err(|e| Error::init(path, e))?;

    let lock_path = path.join(LOCK_FILE);
    let mut lock_options = OpenOptions::new();
    lock_options.read(true).write(true).create(true);
    #[cfg(unix)]
    lock_options.mode(options.file_permissions);
    let lock_file = lock_options
        .open(&lock_path)
        .map_err(|e| Error::init(&lock_path, e))?;
    lock_file.try_lock_exclusive().map_err(|_| Error::StoreLocked)?;

    StoreManifest::load_or_create(path)?;

    let log_dir = path.join(TRANSACTION_LOG_DIR);
    if log_dir.exists() {
        if fs::read_dir(&log_dir)?.next().is_some() {
            warn!("removing transaction logs left behind in {}", log_dir.display());
        }
        fs::remove_dir_all(&log_dir)?;
    }
    fs::create_dir_all(&log_dir).map_err(|e| Error::init(&log_dir, e))?;

    Ok(lock_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::MemoryBackend;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_store_has_empty_revision_zero() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::open(dir.path()).unwrap();

        assert_eq!(store.latest_revision(), 0);
        let reader = store.begin_read(0).unwrap();
        assert_eq!(reader.next_entry_key(), 0);
        assert_eq!(reader.get_entry(0).unwrap(), None);
        assert!(reader.committed_at_millis() > 0);

        assert!(dir.path().join(MANIFEST_FILE).exists());
        assert!(dir.path().join(PAGES_FILE).exists());
    }

    #[test]
    fn test_second_instance_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _store = PageStore::open(dir.path()).unwrap();
        assert!(matches!(PageStore::open(dir.path()), Err(Error::StoreLocked)));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        drop(PageStore::open(dir.path()).unwrap());
        assert!(PageStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_begin_read_past_latest_fails() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.begin_read(1),
            Err(Error::RevisionOutOfRange { requested: 1, latest: 0 })
        ));
    }

    #[test]
    fn test_leftover_transaction_logs_are_removed() {
        let dir = TempDir::new().unwrap();
        drop(PageStore::open(dir.path()).unwrap());

        let stale = dir.path().join(TRANSACTION_LOG_DIR).join("42");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join(OVERFLOW_FILE), b"left over").unwrap();

        let _store = PageStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(dir.path().join(TRANSACTION_LOG_DIR).exists());
    }

    #[test]
    fn test_memory_backend_store() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let store =
            PageStore::open_with_backend(dir.path(), backend.clone(), StoreOptions::default())
                .unwrap();

        let mut trx = store.begin_write().unwrap();
        trx.set_entry(3, b"three").unwrap();
        assert_eq!(trx.commit().unwrap(), 1);

        assert_eq!(store.begin_read(1).unwrap().get_entry(3).unwrap(), Some(b"three".to_vec()));
        assert!(!dir.path().join(PAGES_FILE).exists());
        assert!(!backend.is_empty());
    }

    #[test]
    fn test_empty_path_is_rejected() {
        assert!(PageStore::open("").is_err());
    }
}
