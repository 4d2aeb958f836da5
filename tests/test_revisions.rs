//! Commit, abort and snapshot behaviour of the page store across revisions

use revstore::{Entry, Error, LogKey, PageStore};
use tempfile::TempDir;

#[test]
fn test_commit_durability_and_old_revision_stability() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    let address = LogKey::node_page(0);

    let mut trx = store.begin_write().unwrap();
    trx.touch_for_write(&address)
        .unwrap()
        .as_node_mut()
        .unwrap()
        .set_entry(1, Entry::Value(b"before".to_vec()));
    let old_revision = trx.commit().unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.touch_for_write(&address)
        .unwrap()
        .as_node_mut()
        .unwrap()
        .set_entry(1, Entry::Value(b"after".to_vec()));
    let new_revision = trx.commit().unwrap();
    assert_eq!(new_revision, old_revision + 1);

    let new_page = store.begin_read(new_revision).unwrap().resolve(&address).unwrap();
    assert_eq!(
        new_page.as_node().unwrap().entry(1),
        Some(&Entry::Value(b"after".to_vec()))
    );

    let old_page = store.begin_read(old_revision).unwrap().resolve(&address).unwrap();
    assert_eq!(
        old_page.as_node().unwrap().entry(1),
        Some(&Entry::Value(b"before".to_vec()))
    );
    assert_ne!(old_page.key, new_page.key);
}

#[test]
fn test_abort_isolation_and_overflow_cleanup() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.set_entry(7, b"committed").unwrap();
    trx.commit().unwrap();
    let latest = store.latest_revision();

    let mut trx = store.begin_write().unwrap();
    trx.set_entry(7, b"aborted").unwrap();
    trx.set_entry(9000, b"also aborted").unwrap();
    let overflow = trx.overflow_path();
    assert!(overflow.exists());
    trx.abort().unwrap();

    assert!(!overflow.exists());
    assert_eq!(store.latest_revision(), latest);
    for revision in 0..=latest {
        let reader = store.begin_read(revision).unwrap();
        assert_ne!(reader.get_entry(7).unwrap(), Some(b"aborted".to_vec()));
        assert_eq!(reader.get_entry(9000).unwrap(), None);
    }
    assert_eq!(
        store.begin_read(latest).unwrap().get_entry(7).unwrap(),
        Some(b"committed".to_vec())
    );
}

#[test]
fn test_single_writer() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    let mut first = store.begin_write().unwrap();
    first.set_entry(1, b"first").unwrap();

    let logs_before = std::fs::read_dir(temp_dir.path().join("transaction_log"))
        .unwrap()
        .count();
    assert!(matches!(store.begin_write(), Err(Error::WriterActive)));
    let logs_after = std::fs::read_dir(temp_dir.path().join("transaction_log"))
        .unwrap()
        .count();
    assert_eq!(logs_before, logs_after);

    assert_eq!(first.commit().unwrap(), 1);

    // slot is free again
    let second = store.begin_write().unwrap();
    assert_eq!(second.revision(), 2);
    second.abort().unwrap();
}

#[test]
fn test_partial_page_rewrite_keeps_untouched_entries() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.set_entry(1, b"a").unwrap();
    trx.set_entry(2, b"b").unwrap();
    trx.commit().unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.set_entry(2, b"c").unwrap();
    // only the rewritten entry is in the delta
    let delta = trx.resolve(&LogKey::node_page(0)).unwrap();
    assert_eq!(delta.as_node().unwrap().len(), 1);
    let revision = trx.commit().unwrap();

    let page = store.begin_read(revision).unwrap().resolve(&LogKey::node_page(0)).unwrap();
    let node = page.as_node().unwrap();
    assert_eq!(node.len(), 2);
    assert_eq!(node.entry(1), Some(&Entry::Value(b"a".to_vec())));
    assert_eq!(node.entry(2), Some(&Entry::Value(b"c".to_vec())));
}

#[test]
fn test_removed_entries_leave_no_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    let mut trx = store.begin_write().unwrap();
    for key in 0..5 {
        trx.set_entry(key, format!("v{}", key).as_bytes()).unwrap();
    }
    trx.commit().unwrap();

    let mut trx = store.begin_write().unwrap();
    trx.remove_entry(3).unwrap();
    let revision = trx.commit().unwrap();

    let reader = store.begin_read(revision).unwrap();
    assert_eq!(reader.get_entry(3).unwrap(), None);
    assert_eq!(reader.get_entry(4).unwrap(), Some(b"v4".to_vec()));
    let page = reader.resolve(&LogKey::node_page(0)).unwrap();
    assert!(page
        .as_node()
        .unwrap()
        .entries()
        .all(|(_, entry)| matches!(entry, Entry::Value(_))));

    assert_eq!(
        store.begin_read(revision - 1).unwrap().get_entry(3).unwrap(),
        Some(b"v3".to_vec())
    );
}

#[test]
fn test_history_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = PageStore::open(temp_dir.path()).unwrap();
        for round in 1..=5u64 {
            let mut trx = store.begin_write().unwrap();
            trx.set_entry(round * 1000, format!("round {}", round).as_bytes()).unwrap();
            trx.set_meta("round", round.to_string().as_bytes()).unwrap();
            assert_eq!(trx.commit().unwrap(), round);
        }
    } // Drop releases the lock

    let store = PageStore::open(temp_dir.path()).unwrap();
    assert_eq!(store.latest_revision(), 5);

    for revision in 1..=5u64 {
        let reader = store.begin_read(revision).unwrap();
        assert_eq!(reader.meta("round").unwrap(), Some(revision.to_string().into_bytes()));
        for round in 1..=5u64 {
            let expected = if round <= revision {
                Some(format!("round {}", round).into_bytes())
            } else {
                None
            };
            assert_eq!(reader.get_entry(round * 1000).unwrap(), expected);
        }
    }

    // the reopened store continues the chain
    let mut trx = store.begin_write().unwrap();
    trx.set_entry(1, b"after reopen").unwrap();
    assert_eq!(trx.commit().unwrap(), 6);
}

#[test]
fn test_revision_root_pages_are_addressable() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    for _ in 0..3 {
        let mut trx = store.begin_write().unwrap();
        let key = trx.allocate_entry_key().unwrap();
        trx.set_entry(key, b"x").unwrap();
        trx.commit().unwrap();
    }

    let reader = store.begin_read(3).unwrap();
    for revision in 0..=3u64 {
        let root = reader.resolve(&LogKey::revision_root(revision)).unwrap();
        let root = root.as_revision_root().unwrap();
        assert_eq!(root.revision, revision);
        assert_eq!(root.next_entry_key, revision);
    }
    assert!(matches!(
        reader.resolve(&LogKey::revision_root(4)),
        Err(Error::RevisionOutOfRange { requested: 4, latest: 3 })
    ));
    assert!(matches!(
        reader.resolve(&LogKey::new(false, 1, 128)),
        Err(Error::InvalidAddress { .. })
    ));
}

#[test]
fn test_entries_across_many_node_pages() {
    let temp_dir = TempDir::new().unwrap();
    let store = PageStore::open(temp_dir.path()).unwrap();

    // keys spread so every indirect level gets more than one child
    let keys: Vec<u64> = vec![0, 127, 128, 128 * 128, 128 * 128 * 128 + 5, (1u64 << 35) - 1];

    let mut trx = store.begin_write().unwrap();
    for &key in &keys {
        trx.set_entry(key, &key.to_le_bytes()).unwrap();
    }
    let revision = trx.commit().unwrap();

    let reader = store.begin_read(revision).unwrap();
    for &key in &keys {
        assert_eq!(reader.get_entry(key).unwrap(), Some(key.to_le_bytes().to_vec()));
    }
    assert_eq!(reader.get_entry(1).unwrap(), None);
    assert_eq!(reader.next_entry_key(), 1u64 << 35);
    assert!(matches!(reader.get_entry(1u64 << 35), Err(Error::EntryKeyOutOfRange { .. })));
}

#[test]
fn test_damaged_history_fails_open_instead_of_resetting() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = PageStore::open(temp_dir.path()).unwrap();
        for round in 1..=5u64 {
            let mut trx = store.begin_write().unwrap();
            trx.set_entry(round, b"committed").unwrap();
            trx.commit().unwrap();
        }
    }

    // flip a byte inside the first page record: header, record header, key
    let pages = temp_dir.path().join("pages.db");
    let mut bytes = std::fs::read(&pages).unwrap();
    bytes[16 + 12 + 17 + 3] ^= 0xff;
    std::fs::write(&pages, &bytes).unwrap();

    assert!(matches!(
        PageStore::open(temp_dir.path()),
        Err(Error::DataCorruption { .. })
    ));
    assert_eq!(std::fs::metadata(&pages).unwrap().len(), bytes.len() as u64);
}
