use crate::core::backend::BackendReader;
use crate::core::codec;
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::keys::StorageKey;
use crate::core::page::Page;
use std::sync::Arc;

/// A link from one page to another: either the page is already in hand, or
/// all we have is the durable key to fetch it by.
#[derive(Debug, Clone)]
pub enum PageReference {
    Resident(Arc<Page>),
    Unresolved(PageKey),
}

impl PageReference {
    pub fn key(&self) -> PageKey {
        match self {
            PageReference::Resident(page) => page.key,
            PageReference::Unresolved(key) => *key,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, PageReference::Resident(_))
    }

    /// Returns the page, calling `load` only for unresolved references.
    pub fn resolve<F>(&self, load: F) -> Result<Arc<Page>>
    where
        F: FnOnce(PageKey) -> Result<Arc<Page>>,
    {
        match self {
            PageReference::Resident(page) => Ok(page.clone()),
            PageReference::Unresolved(key) => load(*key),
        }
    }
}

impl From<Page> for PageReference {
    fn from(page: Page) -> Self {
        PageReference::Resident(Arc::new(page))
    }
}

/// Reads and decodes the committed page stored under `key`.
///
/// A reference to a key the backend does not have, or bytes that decode to a
/// page claiming another key, means the page graph is damaged.
pub fn load_page<R: BackendReader + ?Sized>(backend: &R, key: PageKey) -> Result<Page> {
    if key == NULL_PAGE_KEY {
        return Err(Error::DataCorruption {
            details: "reference to the null page key".to_string(),
        });
    }
    let bytes = backend
        .get(&StorageKey::Page(key).encode())?
        .ok_or_else(|| Error::DataCorruption {
            details: format!("dangling reference to page {}", key),
        })?;
    let page = codec::decode_page(&bytes)?;
    if page.key != key {
        return Err(Error::DataCorruption {
            details: format!("page stored under key {} claims key {}", key, page.key),
        });
    }
    Ok(page)
}
