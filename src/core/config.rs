use crate::core::constants::*;
use crate::core::errors::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Containers a write transaction keeps in memory before spilling to disk.
    pub log_capacity: usize,
    /// Committed pages each read transaction caches.
    pub read_cache_capacity: usize,
    pub sync_on_commit: bool,
    pub file_permissions: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            read_cache_capacity: DEFAULT_READ_CACHE_CAPACITY,
            sync_on_commit: true,
            file_permissions: 0o644,
        }
    }
}

/// Tree geometry and format version, written once when a store is created.
/// Reopening with a binary built for different geometry is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub format_version: u32,
    pub content_exponent: u32,
    pub leaf_level: i64,
    pub created_at_millis: u64,
}

impl StoreManifest {
    pub fn current() -> Self {
        Self {
            format_version: VERSION,
            content_exponent: CONTENT_EXPONENT,
            leaf_level: LEAF_LEVEL,
            created_at_millis: now_millis(),
        }
    }

    /// Reads `<dir>/manifest.json`, creating it on first use.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            let manifest = Self::current();
            fs::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
            return Ok(manifest);
        }

        let manifest: StoreManifest = serde_json::from_slice(&fs::read(&path)?)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != VERSION {
            return Err(Error::InvalidVersion {
                details: format!(
                    "store format version {} (expected {})",
                    self.format_version, VERSION
                ),
            });
        }
        if self.content_exponent != CONTENT_EXPONENT || self.leaf_level != LEAF_LEVEL {
            return Err(Error::InvalidVersion {
                details: format!(
                    "store tree geometry 2^{} x {} levels (expected 2^{} x {} levels)",
                    self.content_exponent, self.leaf_level, CONTENT_EXPONENT, LEAF_LEVEL
                ),
            });
        }
        Ok(())
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
