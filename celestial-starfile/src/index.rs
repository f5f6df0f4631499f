//! Cumulative per-cell index.
//!
//! Entry `i` holds the number of records in cells `first_cell..=first_cell + i`,
//! so the records of a cell are `entries[i - 1]..entries[i]` (or `0..entries[0]`
//! for the first cell). The table is built either from a sorted stream of cell
//! ids ([`StreamingIndex`], one pass) or from per-cell counts known up front
//! ([`CumulativeIndex::from_counts`], two passes).

use std::collections::BTreeMap;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CatalogError, CatalogResult};
use crate::format::{CellSpan, INDEX_ENTRY_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeIndex {
    first_cell: u32,
    entries: Vec<u32>,
}

impl CumulativeIndex {
    /// Accumulate per-cell counts, the first count belonging to `first_cell`.
    pub fn from_counts(
        first_cell: u32,
        counts: impl IntoIterator<Item = u32>,
    ) -> CatalogResult<Self> {
        let mut total = 0u32;
        let mut entries = Vec::new();
        for count in counts {
            total = add_records(total, count)?;
            entries.push(total);
        }
        Ok(Self {
            first_cell,
            entries,
        })
    }

    /// One pass over a cell id stream sorted ascending, one id per record.
    pub fn from_sorted_cells(
        first_cell: u32,
        last_cell: u32,
        cells: impl IntoIterator<Item = u32>,
    ) -> CatalogResult<Self> {
        let mut builder = StreamingIndex::new(first_cell, last_cell);
        let mut entries = vec![0u32; builder.len() as usize];
        let mut apply = |patch: SlotPatch| {
            for slot in patch.slots {
                entries[slot as usize] = patch.value;
            }
        };
        for cell in cells {
            if let Some(patch) = builder.advance(cell)? {
                apply(patch);
            }
        }
        apply(builder.finish());
        Ok(Self {
            first_cell,
            entries,
        })
    }

    /// Parse `entries` little-endian u32 values. The caller validates monotonicity.
    pub fn from_le_bytes(first_cell: u32, bytes: &[u8]) -> CatalogResult<Self> {
        if bytes.len() % INDEX_ENTRY_SIZE != 0 {
            return Err(CatalogError::corrupt(format!(
                "index length {} is not a multiple of {}",
                bytes.len(),
                INDEX_ENTRY_SIZE
            )));
        }
        let mut entries = vec![0u32; bytes.len() / INDEX_ENTRY_SIZE];
        LittleEndian::read_u32_into(bytes, &mut entries);
        Ok(Self {
            first_cell,
            entries,
        })
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.entries.len() * INDEX_ENTRY_SIZE];
        LittleEndian::write_u32_into(&self.entries, &mut bytes);
        bytes
    }

    /// Check the entries never decrease.
    pub fn validate(&self) -> CatalogResult<()> {
        if let Some(pos) = self.entries.windows(2).position(|w| w[1] < w[0]) {
            return Err(CatalogError::corrupt(format!(
                "index decreases at cell {}: {} -> {}",
                self.first_cell as u64 + pos as u64 + 1,
                self.entries[pos],
                self.entries[pos + 1]
            )));
        }
        Ok(())
    }

    pub fn first_cell(&self) -> u32 {
        self.first_cell
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Records in the whole file.
    pub fn total(&self) -> u32 {
        self.entries.last().copied().unwrap_or(0)
    }

    pub fn contains_cell(&self, cell: u32) -> bool {
        cell >= self.first_cell && ((cell - self.first_cell) as usize) < self.entries.len()
    }

    pub fn span(&self, cell: u32) -> CatalogResult<CellSpan> {
        if !self.contains_cell(cell) {
            return Err(CatalogError::CellOutOfRange {
                cell,
                first_cell: self.first_cell,
                last_cell: (self.first_cell as u64 + self.entries.len() as u64)
                    .saturating_sub(1) as u32,
            });
        }
        let slot = (cell - self.first_cell) as usize;
        let start = if slot == 0 { 0 } else { self.entries[slot - 1] };
        span_between(cell, start, self.entries[slot])
    }

    pub fn count_in_cell(&self, cell: u32) -> CatalogResult<u32> {
        Ok(self.span(cell)?.count())
    }
}

/// Span from two adjacent index entries, rejecting a decreasing pair.
pub fn span_between(cell: u32, start: u32, end: u32) -> CatalogResult<CellSpan> {
    if end < start {
        return Err(CatalogError::corrupt(format!(
            "index entry for cell {} ({}) is below its predecessor ({})",
            cell, end, start
        )));
    }
    Ok(CellSpan { start, end })
}

fn add_records(total: u32, count: u32) -> CatalogResult<u32> {
    total
        .checked_add(count)
        .ok_or_else(|| CatalogError::overflow("record count", total as f64 + count as f64, "u32"))
}

/// Index slots that now hold their final value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPatch {
    /// Slot positions relative to the first cell.
    pub slots: Range<u32>,
    pub value: u32,
}

/// Fold state of the single-pass builder.
///
/// Each record's cell is fed to [`advance`](Self::advance). When the cell
/// changes, the slots of the cell just closed and of any empty cells skipped
/// over are final and come back as a [`SlotPatch`].
#[derive(Debug, Clone)]
pub struct StreamingIndex {
    first_cell: u32,
    last_cell: u32,
    current: Option<u32>,
    next_slot: u32,
    total: u32,
}

impl StreamingIndex {
    pub fn new(first_cell: u32, last_cell: u32) -> Self {
        Self {
            first_cell,
            last_cell,
            current: None,
            next_slot: 0,
            total: 0,
        }
    }

    /// Number of slots covered.
    pub fn len(&self) -> u32 {
        if self.last_cell < self.first_cell {
            0
        } else {
            self.last_cell - self.first_cell + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Account for one record in `cell`.
    ///
    /// Fails without changing state if `cell` lies outside the range or
    /// precedes the current cell.
    pub fn advance(&mut self, cell: u32) -> CatalogResult<Option<SlotPatch>> {
        if self.is_empty() || cell < self.first_cell || cell > self.last_cell {
            return Err(CatalogError::malformed(format!(
                "cell {} outside [{}, {}]",
                cell, self.first_cell, self.last_cell
            )));
        }
        let total = add_records(self.total, 1)?;
        let patch = match self.current {
            Some(current) if cell < current => {
                return Err(CatalogError::malformed(format!(
                    "cell ids not sorted: {} after {}",
                    cell, current
                )));
            }
            Some(current) if cell == current => None,
            _ => {
                let slot = cell - self.first_cell;
                let patch = SlotPatch {
                    slots: self.next_slot..slot,
                    value: self.total,
                };
                self.next_slot = slot;
                self.current = Some(cell);
                Some(patch).filter(|p| !p.slots.is_empty())
            }
        };
        self.total = total;
        Ok(patch)
    }

    /// Slots from the current cell to the end of the range.
    pub fn finish(self) -> SlotPatch {
        SlotPatch {
            slots: self.next_slot..self.len(),
            value: self.total,
        }
    }
}

/// Per-cell record counts, answered before any record is written.
pub trait CellCounts {
    fn count_in_cell(&self, cell: u32) -> u32;

    /// Lowest and highest populated cells in `first..=last`, if any.
    fn occupied_range(&self, first: u32, last: u32) -> Option<(u32, u32)> {
        let mut occupied = (first..=last).filter(|&c| self.count_in_cell(c) > 0);
        let low = occupied.next()?;
        let high = occupied.last().unwrap_or(low);
        Some((low, high))
    }
}

/// Sparse in-memory cell counts.
#[derive(Debug, Clone, Default)]
pub struct CellHistogram {
    counts: BTreeMap<u32, u32>,
    total: u64,
}

impl CellHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells(cells: impl IntoIterator<Item = u32>) -> Self {
        let mut histogram = Self::new();
        for cell in cells {
            histogram.add(cell);
        }
        histogram
    }

    pub fn add(&mut self, cell: u32) {
        *self.counts.entry(cell).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of populated cells.
    pub fn occupied_cells(&self) -> usize {
        self.counts.len()
    }
}

impl CellCounts for CellHistogram {
    fn count_in_cell(&self, cell: u32) -> u32 {
        self.counts.get(&cell).copied().unwrap_or(0)
    }

    fn occupied_range(&self, first: u32, last: u32) -> Option<(u32, u32)> {
        if first > last {
            return None;
        }
        let mut range = self.counts.range(first..=last);
        let (&low, _) = range.next()?;
        let high = range.next_back().map(|(&c, _)| c).unwrap_or(low);
        Some((low, high))
    }
}

impl<T: CellCounts + ?Sized> CellCounts for &T {
    fn count_in_cell(&self, cell: u32) -> u32 {
        (**self).count_in_cell(cell)
    }

    fn occupied_range(&self, first: u32, last: u32) -> Option<(u32, u32)> {
        (**self).occupied_range(first, last)
    }
}
