use std::fmt;

use page_constants::PAGE_SIZE;

use crate::error::{Error, Result};

pub type PageId = u32;

pub mod page_constants {
    // Size of every block in the page file
    pub const PAGE_SIZE: usize = 1024 * 4;
}

/// A fixed-size block of the page file.
///
/// The byte layout is caller-defined. `dirty` means the in-memory bytes differ
/// from what the page store last persisted; a store write clears it.
pub struct Page {
    id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
    dirty: bool,
}

impl Page {
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: Box::new([0; PAGE_SIZE]),
            dirty: false,
        }
    }

    pub fn from_bytes(id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            id,
            data,
            dirty: false,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Mutable access to the raw bytes. Marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.dirty = true;
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = Self::checked_end(offset, len)?;
        Ok(&self.data[offset..end])
    }

    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let end = Self::checked_end(offset, src.len())?;
        self.data[offset..end].copy_from_slice(src);
        self.dirty = true;
        Ok(())
    }

    fn checked_end(offset: usize, len: usize) -> Result<usize> {
        offset
            .checked_add(len)
            .filter(|end| *end <= PAGE_SIZE)
            .ok_or(Error::OffsetNotFound { offset, len })
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
