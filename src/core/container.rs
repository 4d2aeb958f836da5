use crate::core::codec::{self, ByteReader};
use crate::core::errors::*;
use crate::core::page::*;

/// The pair of page versions buffered for one slot during a write transaction:
/// the last committed content and the delta this transaction has written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageContainer {
    complete: Page,
    modified: Page,
}

impl PageContainer {
    /// First touch of a slot: the delta starts empty with `complete`'s identity.
    pub fn new_from_complete(complete: Page) -> Self {
        let modified = complete.empty_like();
        Self { complete, modified }
    }

    /// Caller guarantees both pages address the same slot.
    pub fn new(complete: Page, modified: Page) -> Self {
        Self { complete, modified }
    }

    pub fn get_complete(&self) -> &Page {
        &self.complete
    }

    pub fn get_modified(&self) -> &Page {
        &self.modified
    }

    pub fn get_modified_mut(&mut self) -> &mut Page {
        &mut self.modified
    }

    /// The page this container commits as.
    pub fn merged(&self) -> Result<Page> {
        self.complete.merge(&self.modified)
    }

    /// Node entry as seen by the owning transaction: the delta first, then the
    /// committed content. A tombstone hides the committed value.
    pub fn node_entry(&self, offset: u32) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.modified.as_node()?.entry(offset) {
            return Ok(entry.value().map(|v| v.to_vec()));
        }
        Ok(self
            .complete
            .as_node()?
            .entry(offset)
            .and_then(|e| e.value())
            .map(|v| v.to_vec()))
    }

    pub fn meta_entry(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.modified.as_meta()?.entry(name) {
            return Ok(entry.value().map(|v| v.to_vec()));
        }
        Ok(self
            .complete
            .as_meta()?
            .entry(name)
            .and_then(|e| e.value())
            .map(|v| v.to_vec()))
    }

    /// Effective child reference of a buffered indirect page.
    pub fn reference(&self, offset: usize) -> Result<Option<u64>> {
        Ok(self
            .modified
            .as_indirect()?
            .reference(offset)
            .or(self.complete.as_indirect()?.reference(offset)))
    }

    /// Writes `complete` then `modified`; the first is length-prefixed so the
    /// split point is unambiguous.
    pub fn serialize(&self, sink: &mut Vec<u8>) {
        let complete = codec::encode_page(&self.complete);
        sink.extend_from_slice(&(complete.len() as u32).to_le_bytes());
        sink.extend_from_slice(&complete);
        codec::encode_page_into(&self.modified, sink);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize(&mut buf);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data, "page container");
        let complete_len = reader.u32()? as usize;
        let complete = codec::decode_page(reader.bytes(complete_len)?)?;
        let modified = codec::read_page(&mut reader)?;
        reader.finish()?;
        Ok(Self::new(complete, modified))
    }
}
