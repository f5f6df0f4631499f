//! Record sources feeding the writers.
//!
//! Writers take any `Iterator<Item = CatalogResult<CellStar>>` sorted by cell
//! id. Errors raised by the source stop the write and are returned unchanged.

use std::vec;

use crate::error::CatalogResult;
use crate::format::StarRecord;
use crate::healpix::Tessellation;
use crate::index::CellHistogram;

/// A record paired with the cell it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CellStar {
    pub cell: u32,
    pub star: StarRecord,
}

impl CellStar {
    pub fn new(cell: u32, star: StarRecord) -> Self {
        Self { cell, star }
    }

    /// Pair a star with the cell containing its position.
    pub fn locate(tessellation: &Tessellation, star: StarRecord) -> Self {
        let cell = tessellation.cell_of(star.ra, star.dec);
        Self { cell, star }
    }
}

/// In-memory source, for tests and for inputs small enough to hold.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Vec<CellStar>,
}

impl VecSource {
    pub fn new(records: Vec<CellStar>) -> Self {
        Self { records }
    }

    /// Stable sort by cell, keeping source order inside each cell.
    pub fn sorted(mut records: Vec<CellStar>) -> Self {
        records.sort_by_key(|r| r.cell);
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CellStar] {
        &self.records
    }

    pub fn histogram(&self) -> CellHistogram {
        CellHistogram::from_cells(self.records.iter().map(|r| r.cell))
    }

    /// Records whose cell lies in `first..=last`. Requires sorted records.
    pub fn cell_range(&self, first: u32, last: u32) -> &[CellStar] {
        let start = self.records.partition_point(|r| r.cell < first);
        let end = self.records.partition_point(|r| r.cell <= last);
        &self.records[start..end.max(start)]
    }

    /// Borrowing iterator in the shape writers expect.
    pub fn iter(&self) -> impl Iterator<Item = CatalogResult<CellStar>> + '_ {
        self.records.iter().cloned().map(Ok)
    }
}

impl IntoIterator for VecSource {
    type Item = CatalogResult<CellStar>;
    type IntoIter = std::iter::Map<vec::IntoIter<CellStar>, fn(CellStar) -> CatalogResult<CellStar>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter().map(Ok as fn(CellStar) -> CatalogResult<CellStar>)
    }
}
