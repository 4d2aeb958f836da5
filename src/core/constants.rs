pub const VERSION: u32 = 1;

pub const BACKEND_MAGIC: [u8; 4] = *b"RVKV";

pub const UBER_MAGIC: [u8; 4] = *b"RVUB";

/// Exponent of the fan-out of every indirect page and of the entry count of a node page.
pub const CONTENT_EXPONENT: u32 = 7;

pub const CONTENT_COUNT: usize = 1 << CONTENT_EXPONENT;

/// Number of indirect levels above the leaves. Leaves live at this level.
pub const LEAF_LEVEL: i64 = 4;

/// Largest leaf sequence addressable through the indirect tree (exclusive).
pub const MAX_LEAF_SEQUENCE: i64 = 1 << (CONTENT_EXPONENT as i64 * LEAF_LEVEL);

/// Entry keys live in node pages; this is one past the largest addressable key.
pub const MAX_ENTRY_KEY: u64 = (MAX_LEAF_SEQUENCE as u64) << CONTENT_EXPONENT;

/// Level used by the meta page sentinel address.
pub const META_LEVEL: i64 = -1;

/// Key 0 never names a page; the page counter starts at 1.
pub const NULL_PAGE_KEY: PageKey = 0;

pub const FIRST_PAGE_KEY: PageKey = 1;

pub const DEFAULT_LOG_CAPACITY: usize = 100;

pub const DEFAULT_READ_CACHE_CAPACITY: usize = 1000;

pub const BACKEND_HEADER_SIZE: usize = 16;

/// key len + value len + crc
pub const RECORD_HEADER_SIZE: usize = 12;

pub const BACKEND_KEY_SIZE: usize = 17;

pub const PAGES_FILE: &str = "pages.db";

pub const OVERFLOW_FILE: &str = "overflow.db";

pub const TRANSACTION_LOG_DIR: &str = "transaction_log";

pub const MANIFEST_FILE: &str = "manifest.json";

pub const LOCK_FILE: &str = "store.lock";

pub type PageKey = u64;

pub type Revision = u64;
