//! Failures of the on-disk overflow log surface to the caller without
//! leaving the writer slot taken

use revstore::{Error, PageStore};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_begin_write_fails_when_overflow_log_cannot_be_created() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();
    let writers_before = store.metrics().write_transactions_begun;

    // a plain file where the log directories should go
    let log_dir = temp_dir.path().join("transaction_log");
    fs::remove_dir_all(&log_dir).unwrap();
    fs::write(&log_dir, b"not a directory").unwrap();

    assert!(matches!(store.begin_write(), Err(Error::Initialization { .. })));
    assert!(!store.is_writer_active());
    assert_eq!(store.metrics().write_transactions_begun, writers_before);
    assert_eq!(store.metrics().active_readers, 0);

    fs::remove_file(&log_dir).unwrap();
    fs::create_dir(&log_dir).unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.set_entry(1, b"recovered").unwrap();
    assert_eq!(trx.commit().unwrap(), 1);
}

#[cfg(unix)]
#[test]
fn test_abort_reports_overflow_cleanup_failure() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.set_entry(1, b"discarded").unwrap();

    // swap the log directory for a plain file so it cannot be removed as one
    let overflow = trx.overflow_path();
    fs::remove_dir_all(&overflow).unwrap();
    fs::write(&overflow, b"in the way").unwrap();

    assert!(trx.abort().is_err());
    assert!(!store.is_writer_active());
    assert_eq!(store.latest_revision(), 0);
    assert_eq!(store.begin_read_latest().unwrap().get_entry(1).unwrap(), None);
    assert_eq!(store.metrics().aborts, 1);

    // the store stays usable
    let mut trx = store.begin_write().unwrap();
    trx.set_entry(1, b"kept").unwrap();
    assert_eq!(trx.commit().unwrap(), 1);
}
