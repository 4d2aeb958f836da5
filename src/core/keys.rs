use crate::core::constants::*;
use crate::core::errors::*;

const NODE_PARTITION_TAG: u8 = 0;
const ROOT_PARTITION_TAG: u8 = 1;
const PAGE_TAG: u8 = 2;

/// Structural address of a page inside one revision's page tree.
///
/// The page at `level` with `sequence` s covers the leaf sequences
/// `[s << 7*(LEAF_LEVEL - level), (s + 1) << 7*(LEAF_LEVEL - level))`.
/// Equality and hashing are structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    pub is_root_partition: bool,
    pub level: i64,
    pub sequence: i64,
}

impl LogKey {
    /// Sentinel naming the published uber page in the backend.
    pub const UBER_POINTER: LogKey = LogKey {
        is_root_partition: true,
        level: META_LEVEL,
        sequence: 0,
    };

    /// Sentinel naming the meta page of the revision under construction.
    pub const META: LogKey = LogKey {
        is_root_partition: false,
        level: META_LEVEL,
        sequence: 0,
    };

    pub fn new(is_root_partition: bool, level: i64, sequence: i64) -> Self {
        Self {
            is_root_partition,
            level,
            sequence,
        }
    }

    pub fn node_page(sequence: i64) -> Self {
        Self::new(false, LEAF_LEVEL, sequence)
    }

    pub fn revision_root(revision: Revision) -> Self {
        Self::new(true, LEAF_LEVEL, revision as i64)
    }

    pub fn is_meta(&self) -> bool {
        *self == Self::META
    }

    pub fn is_leaf(&self) -> bool {
        self.level == LEAF_LEVEL
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_meta() {
            return Ok(());
        }
        let in_range = self.level >= 0
            && self.level <= LEAF_LEVEL
            && self.sequence >= 0
            && self.sequence < (1i64 << (CONTENT_EXPONENT as i64 * self.level));
        if in_range {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    pub(crate) fn invalid(&self) -> Error {
        Error::InvalidAddress {
            is_root_partition: self.is_root_partition,
            level: self.level,
            sequence: self.sequence,
        }
    }

    /// The page at `level` on the path from the tree root to this page.
    pub fn ancestor(&self, level: i64) -> LogKey {
        debug_assert!(level >= 0 && level <= self.level);
        let shift = CONTENT_EXPONENT as i64 * (self.level - level);
        LogKey::new(self.is_root_partition, level, self.sequence >> shift)
    }

    /// Slot inside the ancestor at `level` that leads one step closer to this page.
    pub fn child_offset(&self, level: i64) -> usize {
        debug_assert!(level >= 0 && level < self.level);
        let shift = CONTENT_EXPONENT as i64 * (self.level - level - 1);
        ((self.sequence >> shift) as usize) & (CONTENT_COUNT - 1)
    }

    pub fn to_bytes(&self) -> [u8; BACKEND_KEY_SIZE] {
        let tag = if self.is_root_partition {
            ROOT_PARTITION_TAG
        } else {
            NODE_PARTITION_TAG
        };
        encode_triple(tag, self.level, self.sequence)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (tag, level, sequence) = decode_triple(data)?;
        match tag {
            NODE_PARTITION_TAG => Ok(LogKey::new(false, level, sequence)),
            ROOT_PARTITION_TAG => Ok(LogKey::new(true, level, sequence)),
            other => Err(Error::decode("log key", format!("unexpected key tag {}", other))),
        }
    }
}

/// Node page address and slot offset holding entry `key`.
pub fn entry_location(key: u64) -> Result<(LogKey, u32)> {
    if key >= MAX_ENTRY_KEY {
        return Err(Error::EntryKeyOutOfRange { key });
    }
    let page = LogKey::node_page((key >> CONTENT_EXPONENT) as i64);
    Ok((page, (key & (CONTENT_COUNT as u64 - 1)) as u32))
}

/// Key under which something is stored in a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKey {
    Log(LogKey),
    Page(PageKey),
}

impl StorageKey {
    pub const UBER_POINTER: StorageKey = StorageKey::Log(LogKey::UBER_POINTER);

    pub fn encode(&self) -> [u8; BACKEND_KEY_SIZE] {
        match self {
            StorageKey::Log(key) => key.to_bytes(),
            StorageKey::Page(key) => encode_triple(PAGE_TAG, *key as i64, 0),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (tag, first, _) = decode_triple(data)?;
        if tag == PAGE_TAG {
            Ok(StorageKey::Page(first as u64))
        } else {
            Ok(StorageKey::Log(LogKey::from_bytes(data)?))
        }
    }
}

// Sign bit is flipped so the big-endian bytes sort like the signed values.
fn encode_triple(tag: u8, first: i64, second: i64) -> [u8; BACKEND_KEY_SIZE] {
    let mut buf = [0u8; BACKEND_KEY_SIZE];
    buf[0] = tag;
    buf[1..9].copy_from_slice(&((first as u64) ^ (1 << 63)).to_be_bytes());
    buf[9..17].copy_from_slice(&((second as u64) ^ (1 << 63)).to_be_bytes());
    buf
}

fn decode_triple(data: &[u8]) -> Result<(u8, i64, i64)> {
    if data.len() != BACKEND_KEY_SIZE {
        return Err(Error::decode(
            "storage key",
            format!("expected {} bytes, got {}", BACKEND_KEY_SIZE, data.len()),
        ));
    }
    let first = u64::from_be_bytes(data[1..9].try_into()?) ^ (1 << 63);
    let second = u64::from_be_bytes(data[9..17].try_into()?) ^ (1 << 63);
    Ok((data[0], first as i64, second as i64))
}
