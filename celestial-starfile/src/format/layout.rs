//! Byte offsets inside a catalog file.

use std::ops::Range;

use super::header::{CatalogHeader, HEADER_SIZE};
use crate::error::CatalogResult;

/// Size of one cumulative index entry.
pub const INDEX_ENTRY_SIZE: usize = 4;

/// Records of one cell, as positions in the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSpan {
    /// Position of the cell's first record.
    pub start: u32,
    /// One past the cell's last record.
    pub end: u32,
}

impl CellSpan {
    pub fn count(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Where the index and data sections of a file sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogLayout {
    pub first_cell: u32,
    pub index_entries: u32,
    pub record_size: usize,
}

impl CatalogLayout {
    pub fn of(header: &CatalogHeader) -> CatalogResult<Self> {
        Ok(Self {
            first_cell: header.first_cell,
            index_entries: header.cell_span(),
            record_size: header.codec()?.record_size(),
        })
    }

    pub fn index_offset(&self) -> u64 {
        HEADER_SIZE as u64
    }

    pub fn index_len(&self) -> u64 {
        self.index_entries as u64 * INDEX_ENTRY_SIZE as u64
    }

    /// Offset of the entry for `cell`. The cell must be inside the file's range.
    pub fn entry_offset(&self, cell: u32) -> u64 {
        self.index_offset() + (cell - self.first_cell) as u64 * INDEX_ENTRY_SIZE as u64
    }

    pub fn data_offset(&self) -> u64 {
        self.index_offset() + self.index_len()
    }

    /// Byte range of the records in `span`.
    pub fn record_bytes(&self, span: CellSpan) -> Range<u64> {
        let size = self.record_size as u64;
        let start = self.data_offset() + span.start as u64 * size;
        start..start + span.count() as u64 * size
    }

    /// Full file length for `total` records.
    pub fn file_len(&self, total: u32) -> u64 {
        self.data_offset() + total as u64 * self.record_size as u64
    }
}
