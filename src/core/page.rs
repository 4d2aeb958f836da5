use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::keys::LogKey;
use std::collections::BTreeMap;

/// A value slot in a node or meta page. `Deleted` only ever appears in the
/// modified half of a container; merging drops it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    Value(Vec<u8>),
    Deleted,
}

impl Entry {
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Deleted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndirectPage {
    references: Vec<Option<PageKey>>,
}

impl IndirectPage {
    pub fn new() -> Self {
        Self {
            references: vec![None; CONTENT_COUNT],
        }
    }

    pub fn reference(&self, offset: usize) -> Option<PageKey> {
        self.references.get(offset).copied().flatten()
    }

    pub fn set_reference(&mut self, offset: usize, key: PageKey) {
        self.references[offset] = Some(key);
    }

    pub fn references(&self) -> impl Iterator<Item = (usize, PageKey)> + '_ {
        self.references
            .iter()
            .enumerate()
            .filter_map(|(offset, key)| key.map(|k| (offset, k)))
    }

    fn merge(&self, modified: &IndirectPage) -> IndirectPage {
        let references = self
            .references
            .iter()
            .zip(modified.references.iter())
            .map(|(old, new)| new.or(*old))
            .collect();
        IndirectPage { references }
    }
}

impl Default for IndirectPage {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionRootPage {
    pub revision: Revision,
    /// Next entry key handed out by `allocate_entry_key`.
    pub next_entry_key: u64,
    pub node_root: Option<PageKey>,
    pub meta_root: Option<PageKey>,
    pub committed_at_millis: u64,
}

impl RevisionRootPage {
    pub fn new(revision: Revision) -> Self {
        Self {
            revision,
            next_entry_key: 0,
            node_root: None,
            meta_root: None,
            committed_at_millis: 0,
        }
    }

    /// Fresh root for `revision`, carrying forward the pointers of `previous`.
    pub fn successor(previous: &RevisionRootPage, revision: Revision) -> Self {
        Self {
            revision,
            next_entry_key: previous.next_entry_key,
            node_root: previous.node_root,
            meta_root: previous.meta_root,
            committed_at_millis: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePage {
    entries: BTreeMap<u32, Entry>,
}

impl NodePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, offset: u32) -> Option<&Entry> {
        self.entries.get(&offset)
    }

    pub fn set_entry(&mut self, offset: u32, entry: Entry) {
        self.entries.insert(offset, entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &Entry)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge(&self, modified: &NodePage) -> NodePage {
        NodePage {
            entries: merge_entries(&self.entries, &modified.entries),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MetaPage {
    entries: BTreeMap<String, Entry>,
}

impl MetaPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn set_entry(&mut self, name: &str, entry: Entry) {
        self.entries.insert(name.to_string(), entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge(&self, modified: &MetaPage) -> MetaPage {
        MetaPage {
            entries: merge_entries(&self.entries, &modified.entries),
        }
    }
}

fn merge_entries<K: Ord + Clone>(
    complete: &BTreeMap<K, Entry>,
    modified: &BTreeMap<K, Entry>,
) -> BTreeMap<K, Entry> {
    let mut merged = complete.clone();
    for (key, entry) in modified {
        match entry {
            Entry::Value(_) => {
                merged.insert(key.clone(), entry.clone());
            }
            Entry::Deleted => {
                merged.remove(key);
            }
        }
    }
    merged.retain(|_, entry| !matches!(entry, Entry::Deleted));
    merged
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageBody {
    Indirect(IndirectPage),
    RevisionRoot(RevisionRootPage),
    Node(NodePage),
    Meta(MetaPage),
}

impl PageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            PageBody::Indirect(_) => "indirect",
            PageBody::RevisionRoot(_) => "revision root",
            PageBody::Node(_) => "node",
            PageBody::Meta(_) => "meta",
        }
    }
}

/// One version of one page. `key` is the durable backend key this version is
/// (or will be) stored under; `revision` is the revision that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Page {
    pub key: PageKey,
    pub revision: Revision,
    pub body: PageBody,
}

impl Page {
    pub fn new(key: PageKey, revision: Revision, body: PageBody) -> Self {
        Self { key, revision, body }
    }

    /// The page that sits at `address` before anything was ever written there.
    pub fn empty_at(address: &LogKey, key: PageKey, revision: Revision) -> Page {
        let body = if address.is_meta() {
            PageBody::Meta(MetaPage::new())
        } else if !address.is_leaf() {
            PageBody::Indirect(IndirectPage::new())
        } else if address.is_root_partition {
            PageBody::RevisionRoot(RevisionRootPage::new(address.sequence as Revision))
        } else {
            PageBody::Node(NodePage::new())
        };
        Page::new(key, revision, body)
    }

    /// Same identity, no content. Revision roots have no entry content and
    /// are cloned as a whole.
    pub fn empty_like(&self) -> Page {
        let body = match &self.body {
            PageBody::Indirect(_) => PageBody::Indirect(IndirectPage::new()),
            PageBody::RevisionRoot(root) => PageBody::RevisionRoot(root.clone()),
            PageBody::Node(_) => PageBody::Node(NodePage::new()),
            PageBody::Meta(_) => PageBody::Meta(MetaPage::new()),
        };
        Page::new(self.key, self.revision, body)
    }

    /// Moves this version to a new durable key written by `revision`.
    pub fn relocate(&mut self, key: PageKey, revision: Revision) {
        self.key = key;
        self.revision = revision;
    }

    /// Overlays `modified` on `self`: modified entries win, tombstones remove,
    /// everything else passes through. Identity is taken from `modified`.
    pub fn merge(&self, modified: &Page) -> Result<Page> {
        let body = match (&self.body, &modified.body) {
            (PageBody::Indirect(c), PageBody::Indirect(m)) => PageBody::Indirect(c.merge(m)),
            (PageBody::Node(c), PageBody::Node(m)) => PageBody::Node(c.merge(m)),
            (PageBody::Meta(c), PageBody::Meta(m)) => PageBody::Meta(c.merge(m)),
            (PageBody::RevisionRoot(_), PageBody::RevisionRoot(m)) => PageBody::RevisionRoot(m.clone()),
            (c, m) => {
                return Err(Error::DataCorruption {
                    details: format!(
                        "cannot merge {} page {} with {} page {}",
                        c.kind(),
                        self.key,
                        m.kind(),
                        modified.key
                    ),
                })
            }
        };
        Ok(Page::new(modified.key, modified.revision, body))
    }

    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match &self.body {
            PageBody::Indirect(page) => Ok(page),
            other => Err(self.unexpected("indirect", other)),
        }
    }

    pub fn as_indirect_mut(&mut self) -> Result<&mut IndirectPage> {
        let key = self.key;
        match &mut self.body {
            PageBody::Indirect(page) => Ok(page),
            other => Err(unexpected_kind(key, "indirect", other.kind())),
        }
    }

    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match &self.body {
            PageBody::RevisionRoot(page) => Ok(page),
            other => Err(self.unexpected("revision root", other)),
        }
    }

    pub fn as_revision_root_mut(&mut self) -> Result<&mut RevisionRootPage> {
        let key = self.key;
        match &mut self.body {
            PageBody::RevisionRoot(page) => Ok(page),
            other => Err(unexpected_kind(key, "revision root", other.kind())),
        }
    }

    pub fn as_node(&self) -> Result<&NodePage> {
        match &self.body {
            PageBody::Node(page) => Ok(page),
            other => Err(self.unexpected("node", other)),
        }
    }

    pub fn as_node_mut(&mut self) -> Result<&mut NodePage> {
        let key = self.key;
        match &mut self.body {
            PageBody::Node(page) => Ok(page),
            other => Err(unexpected_kind(key, "node", other.kind())),
        }
    }

    pub fn as_meta(&self) -> Result<&MetaPage> {
        match &self.body {
            PageBody::Meta(page) => Ok(page),
            other => Err(self.unexpected("meta", other)),
        }
    }

    pub fn as_meta_mut(&mut self) -> Result<&mut MetaPage> {
        let key = self.key;
        match &mut self.body {
            PageBody::Meta(page) => Ok(page),
            other => Err(unexpected_kind(key, "meta", other.kind())),
        }
    }

    fn unexpected(&self, expected: &str, found: &PageBody) -> Error {
        unexpected_kind(self.key, expected, found.kind())
    }
}

fn unexpected_kind(key: PageKey, expected: &str, found: &str) -> Error {
    Error::DataCorruption {
        details: format!("page {} is a {} page, expected {} page", key, found, expected),
    }
}

/// Entry point of the whole store: latest committed revision, the page
/// counter and the root of the revision-root tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UberPage {
    pub revision: Revision,
    pub page_counter: PageKey,
    pub root_indirect: Option<PageKey>,
}

impl UberPage {
    pub fn bootstrap() -> Self {
        Self {
            revision: 0,
            page_counter: FIRST_PAGE_KEY,
            root_indirect: None,
        }
    }

    pub fn allocate_page_key(&mut self) -> PageKey {
        let key = self.page_counter;
        self.page_counter += 1;
        key
    }
}
