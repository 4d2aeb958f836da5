use crate::core::backend::{BackendReader, BackendWriter, Cursor, FileBackend};
use crate::core::constants::*;
use crate::core::container::PageContainer;
use crate::core::errors::*;
use crate::core::keys::LogKey;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Disk tier of a transaction log: a private `FileBackend` living in its own
/// directory `<base>/<discriminator>`. The directory is deleted by `clear`.
pub struct PersistentLog {
    dir: PathBuf,
    backend: Option<FileBackend>,
}

impl PersistentLog {
    pub fn open(base: &Path, discriminator: u64, permissions: u32) -> Result<Self> {
        let dir = base.join(discriminator.to_string());
        if dir.exists() {
            warn!("removing stale overflow log at {}", dir.display());
            fs::remove_dir_all(&dir).map_err(|e| Error::init(&dir, e))?;
        }

        let backend = FileBackend::open(&dir, OVERFLOW_FILE, permissions)?;
        debug!("opened overflow log {}", dir.display());

        Ok(Self {
            dir,
            backend: Some(backend),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn len(&self) -> usize {
        self.backend.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put(&self, key: &LogKey, container: &PageContainer) -> Result<()> {
        let backend = self.backend()?;
        backend.put(&key.to_bytes(), &container.to_bytes())
    }

    pub fn get(&self, key: &LogKey) -> Result<Option<PageContainer>> {
        let backend = self.backend()?;
        match backend.get(&key.to_bytes())? {
            Some(bytes) => Ok(Some(PageContainer::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every spilled entry, in key order. A key spilled more than once yields
    /// only its latest copy.
    pub fn iter(&self) -> Result<OverflowIter<'_>> {
        Ok(OverflowIter {
            cursor: self.backend()?.cursor()?,
        })
    }

    /// Destroys the backend file and removes the directory.
    pub fn clear(&mut self) -> Result<()> {
        let backend = match self.backend.take() {
            Some(backend) => backend,
            None => return Ok(()),
        };
        backend.destroy()?;

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("removed overflow log {}", self.dir.display());
        Ok(())
    }

    fn backend(&self) -> Result<&FileBackend> {
        self.backend.as_ref().ok_or(Error::LogClosed)
    }
}

impl Drop for PersistentLog {
    fn drop(&mut self) {
        if let Err(e) = self.clear() {
            warn!("failed to remove overflow log {}: {}", self.dir.display(), e);
        }
    }
}

pub struct OverflowIter<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Iterator for OverflowIter<'a> {
    type Item = Result<(LogKey, PageContainer)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.next()?;
        Some(item.and_then(|(key, value)| {
            Ok((LogKey::from_bytes(&key)?, PageContainer::deserialize(&value)?))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::page::*;
    use tempfile::TempDir;

    fn container(offset: u32, value: &[u8]) -> PageContainer {
        let mut node = NodePage::new();
        node.set_entry(offset, Entry::Value(value.to_vec()));
        PageContainer::new_from_complete(Page::new(offset as u64 + 1, 1, PageBody::Node(node)))
    }

    #[test]
    fn test_put_get_miss() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::open(dir.path(), 0, 0o644).unwrap();

        let key = LogKey::node_page(3);
        log.put(&key, &container(1, b"x")).unwrap();

        assert_eq!(log.get(&key).unwrap(), Some(container(1, b"x")));
        assert_eq!(log.get(&LogKey::node_page(4)).unwrap(), None);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_discriminators_get_separate_directories() {
        let dir = TempDir::new().unwrap();
        let first = PersistentLog::open(dir.path(), 1, 0o644).unwrap();
        let second = PersistentLog::open(dir.path(), 2, 0o644).unwrap();
        assert_ne!(first.path(), second.path());

        first.put(&LogKey::node_page(0), &container(0, b"a")).unwrap();
        assert_eq!(second.get(&LogKey::node_page(0)).unwrap(), None);
    }

    #[test]
    fn test_iter_yields_latest_copy() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::open(dir.path(), 0, 0o644).unwrap();

        log.put(&LogKey::node_page(2), &container(2, b"old")).unwrap();
        log.put(&LogKey::node_page(1), &container(1, b"one")).unwrap();
        log.put(&LogKey::node_page(2), &container(2, b"new")).unwrap();

        let entries: Vec<_> = log.iter().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(
            entries,
            vec![
                (LogKey::node_page(1), container(1, b"one")),
                (LogKey::node_page(2), container(2, b"new")),
            ]
        );
    }

    #[test]
    fn test_clear_removes_directory() {
        let dir = TempDir::new().unwrap();
        let mut log = PersistentLog::open(dir.path(), 7, 0o644).unwrap();
        log.put(&LogKey::node_page(0), &container(0, b"a")).unwrap();
        let path = log.path().to_path_buf();
        assert!(path.exists());

        log.clear().unwrap();
        assert!(!path.exists());
        assert!(!log.is_open());
        assert!(matches!(log.get(&LogKey::node_page(0)), Err(Error::LogClosed)));
        assert!(matches!(log.put(&LogKey::node_page(0), &container(0, b"a")), Err(Error::LogClosed)));
    }

    #[test]
    fn test_drop_removes_directory() {
        let dir = TempDir::new().unwrap();
        let path = {
            let log = PersistentLog::open(dir.path(), 3, 0o644).unwrap();
            log.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_open_on_unwritable_base_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("plain-file");
        fs::write(&blocker, b"x").unwrap();
        assert!(matches!(
            PersistentLog::open(&blocker, 0, 0o644),
            Err(Error::Initialization { .. })
        ));
    }

    #[test]
    fn test_corrupt_value_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let log = PersistentLog::open(dir.path(), 0, 0o644).unwrap();
        let key = LogKey::node_page(9);
        log.backend().unwrap().put(&key.to_bytes(), b"garbage").unwrap();

        assert!(matches!(log.get(&key), Err(Error::Decode { .. })));
    }
}
