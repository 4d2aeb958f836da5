//! Binary encoding of pages and of the uber page.
//!
//! Layout of a page: `[kind u8][key u64][revision u64][body]`, all integers
//! little endian. Page keys of absent references are written as 0.

use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::page::*;

const KIND_INDIRECT: u8 = 1;
const KIND_REVISION_ROOT: u8 = 2;
const KIND_NODE: u8 = 3;
const KIND_META: u8 = 4;

const ENTRY_VALUE: u8 = 0;
const ENTRY_DELETED: u8 = 1;

const UBER_SIZE: usize = 4 + 4 + 8 + 8 + 8 + 4;

pub fn encode_page(page: &Page) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    encode_page_into(page, &mut buf);
    buf
}

pub fn encode_page_into(page: &Page, buf: &mut Vec<u8>) {
    let kind = match &page.body {
        PageBody::Indirect(_) => KIND_INDIRECT,
        PageBody::RevisionRoot(_) => KIND_REVISION_ROOT,
        PageBody::Node(_) => KIND_NODE,
        PageBody::Meta(_) => KIND_META,
    };
    buf.push(kind);
    buf.extend_from_slice(&page.key.to_le_bytes());
    buf.extend_from_slice(&page.revision.to_le_bytes());

    match &page.body {
        PageBody::Indirect(indirect) => {
            let refs: Vec<(usize, PageKey)> = indirect.references().collect();
            buf.extend_from_slice(&(refs.len() as u16).to_le_bytes());
            for (offset, key) in refs {
                buf.extend_from_slice(&(offset as u16).to_le_bytes());
                buf.extend_from_slice(&key.to_le_bytes());
            }
        }
        PageBody::RevisionRoot(root) => {
            buf.extend_from_slice(&root.revision.to_le_bytes());
            buf.extend_from_slice(&root.next_entry_key.to_le_bytes());
            buf.extend_from_slice(&root.node_root.unwrap_or(NULL_PAGE_KEY).to_le_bytes());
            buf.extend_from_slice(&root.meta_root.unwrap_or(NULL_PAGE_KEY).to_le_bytes());
            buf.extend_from_slice(&root.committed_at_millis.to_le_bytes());
        }
        PageBody::Node(node) => {
            buf.extend_from_slice(&(node.len() as u32).to_le_bytes());
            for (offset, entry) in node.entries() {
                buf.extend_from_slice(&offset.to_le_bytes());
                encode_entry(entry, buf);
            }
        }
        PageBody::Meta(meta) => {
            buf.extend_from_slice(&(meta.len() as u32).to_le_bytes());
            for (name, entry) in meta.entries() {
                buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
                encode_entry(entry, buf);
            }
        }
    }
}

fn encode_entry(entry: &Entry, buf: &mut Vec<u8>) {
    match entry {
        Entry::Value(value) => {
            buf.push(ENTRY_VALUE);
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }
        Entry::Deleted => buf.push(ENTRY_DELETED),
    }
}

pub fn decode_page(data: &[u8]) -> Result<Page> {
    let mut reader = ByteReader::new(data, "page");
    let page = read_page(&mut reader)?;
    reader.finish()?;
    Ok(page)
}

/// Decodes one page from the front of `reader`, leaving the rest.
pub(crate) fn read_page(reader: &mut ByteReader<'_>) -> Result<Page> {
    let kind = reader.u8()?;
    let key = reader.u64()?;
    let revision = reader.u64()?;

    let body = match kind {
        KIND_INDIRECT => {
            let count = reader.u16()? as usize;
            if count > CONTENT_COUNT {
                return Err(reader.error(format!("indirect page claims {} references", count)));
            }
            let mut indirect = IndirectPage::new();
            for _ in 0..count {
                let offset = reader.u16()? as usize;
                let child = reader.u64()?;
                if offset >= CONTENT_COUNT || child == NULL_PAGE_KEY {
                    return Err(reader.error(format!("invalid reference {} -> {}", offset, child)));
                }
                indirect.set_reference(offset, child);
            }
            PageBody::Indirect(indirect)
        }
        KIND_REVISION_ROOT => {
            let mut root = RevisionRootPage::new(reader.u64()?);
            root.next_entry_key = reader.u64()?;
            root.node_root = non_null(reader.u64()?);
            root.meta_root = non_null(reader.u64()?);
            root.committed_at_millis = reader.u64()?;
            PageBody::RevisionRoot(root)
        }
        KIND_NODE => {
            let count = reader.u32()? as usize;
            if count > CONTENT_COUNT {
                return Err(reader.error(format!("node page claims {} entries", count)));
            }
            let mut node = NodePage::new();
            for _ in 0..count {
                let offset = reader.u32()?;
                if offset as usize >= CONTENT_COUNT {
                    return Err(reader.error(format!("entry offset {} out of range", offset)));
                }
                let entry = read_entry(reader)?;
                node.set_entry(offset, entry);
            }
            PageBody::Node(node)
        }
        KIND_META => {
            let count = reader.u32()? as usize;
            let mut meta = MetaPage::new();
            for _ in 0..count {
                let len = reader.u32()? as usize;
                let name = std::str::from_utf8(reader.bytes(len)?)
                    .map_err(|e| reader.error(format!("meta name is not utf-8: {}", e)))?;
                let entry = read_entry(reader)?;
                meta.set_entry(name, entry);
            }
            PageBody::Meta(meta)
        }
        other => return Err(reader.error(format!("unknown page kind {}", other))),
    };

    Ok(Page::new(key, revision, body))
}

fn read_entry(reader: &mut ByteReader<'_>) -> Result<Entry> {
    match reader.u8()? {
        ENTRY_VALUE => {
            let len = reader.u32()? as usize;
            Ok(Entry::Value(reader.bytes(len)?.to_vec()))
        }
        ENTRY_DELETED => Ok(Entry::Deleted),
        other => Err(reader.error(format!("unknown entry tag {}", other))),
    }
}

fn non_null(key: PageKey) -> Option<PageKey> {
    if key == NULL_PAGE_KEY {
        None
    } else {
        Some(key)
    }
}

pub fn encode_uber(uber: &UberPage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(UBER_SIZE);
    buf.extend_from_slice(&UBER_MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&uber.revision.to_le_bytes());
    buf.extend_from_slice(&uber.page_counter.to_le_bytes());
    buf.extend_from_slice(&uber.root_indirect.unwrap_or(NULL_PAGE_KEY).to_le_bytes());
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

pub fn decode_uber(data: &[u8]) -> Result<UberPage> {
    if data.len() != UBER_SIZE {
        return Err(Error::decode("uber page", format!("expected {} bytes, got {}", UBER_SIZE, data.len())));
    }
    if data[0..4] != UBER_MAGIC {
        return Err(Error::InvalidMagic);
    }
    let stored_crc = u32::from_le_bytes(data[UBER_SIZE - 4..].try_into()?);
    if crc32fast::hash(&data[..UBER_SIZE - 4]) != stored_crc {
        return Err(Error::ChecksumMismatch {
            component: "uber page".to_string(),
            offset: 0,
        });
    }

    let mut reader = ByteReader::new(&data[4..UBER_SIZE - 4], "uber page");
    let version = reader.u32()?;
    if version != VERSION {
        return Err(Error::InvalidVersion {
            details: format!("uber page version {} (expected {})", version, VERSION),
        });
    }
    let uber = UberPage {
        revision: reader.u64()?,
        page_counter: reader.u64()?,
        root_indirect: non_null(reader.u64()?),
    };
    reader.finish()?;
    Ok(uber)
}

/// Bounds-checked little-endian cursor over a byte slice.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    context: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], context: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            context,
        }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                self.error(format!(
                    "truncated: need {} bytes at offset {}, have {}",
                    len,
                    self.offset,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into()?))
    }

    pub(crate) fn finish(&self) -> Result<()> {
        if self.offset != self.data.len() {
            return Err(self.error(format!(
                "{} trailing bytes",
                self.data.len() - self.offset
            )));
        }
        Ok(())
    }

    pub(crate) fn error(&self, details: String) -> Error {
        Error::decode(self.context, details)
    }
}
