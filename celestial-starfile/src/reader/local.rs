//! Memory-mapped catalog reader.
//!
//! [`Catalog::open`] maps the file and checks that header, index and data
//! section agree in size. Lookups then read two index entries and decode one
//! contiguous slice of records; nothing else is touched.

use std::fs::File;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use tracing::{debug, warn};

use super::CatalogReader;
use crate::error::{CatalogError, CatalogResult};
use crate::format::{
    CatalogHeader, CatalogLayout, CatalogStar, CellSpan, RecordCodec, HEADER_SIZE,
    INDEX_ENTRY_SIZE,
};
use crate::index::{span_between, CumulativeIndex};

/// Read-only handle to a catalog file. Cheap to share across threads.
pub struct Catalog {
    mmap: Mmap,
    header: CatalogHeader,
    layout: CatalogLayout,
    codec: RecordCodec,
    path: PathBuf,
}

impl Catalog {
    /// Open and memory-map a catalog file.
    ///
    /// # Errors
    /// [`CatalogError::Corrupt`] if the file is shorter than its header and
    /// index, or shorter than the record count in its last index entry.
    pub fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // The file is treated as immutable while mapped.
        let mmap = unsafe { Mmap::map(&file) }?;

        if mmap.len() < HEADER_SIZE {
            return Err(CatalogError::corrupt(format!(
                "file too small: {} bytes, header needs {}",
                mmap.len(),
                HEADER_SIZE
            )));
        }
        let header = CatalogHeader::from_bytes(&mmap[..HEADER_SIZE])?;
        let codec = header.codec()?;
        let layout = CatalogLayout::of(&header)?;

        let file_len = mmap.len() as u64;
        if file_len < layout.data_offset() {
            return Err(CatalogError::corrupt(format!(
                "file too small for index: {} bytes, expected at least {}",
                file_len,
                layout.data_offset()
            )));
        }
        let total = match layout.index_entries {
            0 => 0,
            n => read_entry(&mmap, layout.entry_offset(header.first_cell + (n - 1))),
        };
        let expected = layout.file_len(total);
        if file_len < expected {
            return Err(CatalogError::corrupt(format!(
                "data section truncated: {} bytes, {} records need {}",
                file_len, total, expected
            )));
        }
        if file_len > expected {
            warn!(
                path = %path.display(),
                extra = file_len - expected,
                "trailing bytes after data section"
            );
        }
        debug!(
            path = %path.display(),
            first = header.first_cell,
            last = header.last_cell,
            records = total,
            "opened catalog"
        );

        Ok(Self {
            mmap,
            header,
            layout,
            codec,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Returns the total size of the memory-mapped file in bytes.
    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }

    /// Records in the file, from the last index entry.
    pub fn total_records(&self) -> u32 {
        self.index_bytes()
            .chunks_exact(INDEX_ENTRY_SIZE)
            .last()
            .map(LittleEndian::read_u32)
            .unwrap_or(0)
    }

    /// Copy of the whole index.
    pub fn index(&self) -> CatalogResult<CumulativeIndex> {
        CumulativeIndex::from_le_bytes(self.header.first_cell, self.index_bytes())
    }

    fn index_bytes(&self) -> &[u8] {
        let start = self.layout.index_offset() as usize;
        &self.mmap[start..self.layout.data_offset() as usize]
    }

    fn check_cell(&self, cell: u32) -> CatalogResult<()> {
        if !self.header.contains_cell(cell) {
            return Err(CatalogError::CellOutOfRange {
                cell,
                first_cell: self.header.first_cell,
                last_cell: self.header.last_cell,
            });
        }
        Ok(())
    }

    /// Records before `cell` (its first record's position).
    fn start_of(&self, cell: u32) -> u32 {
        if cell == self.header.first_cell {
            0
        } else {
            read_entry(&self.mmap, self.layout.entry_offset(cell - 1))
        }
    }

    pub fn cell_span(&self, cell: u32) -> CatalogResult<CellSpan> {
        self.check_cell(cell)?;
        let end = read_entry(&self.mmap, self.layout.entry_offset(cell));
        span_between(cell, self.start_of(cell), end)
    }

    /// Undecoded bytes of the records in `cell`.
    pub fn raw_records(&self, cell: u32) -> CatalogResult<&[u8]> {
        let span = self.cell_span(cell)?;
        self.span_bytes(span)
    }

    fn span_bytes(&self, span: CellSpan) -> CatalogResult<&[u8]> {
        let bytes = self.layout.record_bytes(span);
        if bytes.end > self.mmap.len() as u64 {
            return Err(CatalogError::corrupt(format!(
                "records {}..{} extend past end of file ({} bytes)",
                span.start,
                span.end,
                self.mmap.len()
            )));
        }
        Ok(&self.mmap[bytes.start as usize..bytes.end as usize])
    }
}

fn read_entry(mmap: &Mmap, offset: u64) -> u32 {
    let offset = offset as usize;
    LittleEndian::read_u32(&mmap[offset..offset + INDEX_ENTRY_SIZE])
}

impl CatalogReader for Catalog {
    fn header(&self) -> &CatalogHeader {
        &self.header
    }

    fn lookup(&self, cell: u32) -> CatalogResult<Vec<CatalogStar>> {
        let bytes = self.raw_records(cell)?;
        self.codec.decode_all(bytes)
    }

    fn lookup_range(&self, cells: RangeInclusive<u32>) -> CatalogResult<Vec<CatalogStar>> {
        let (first, last) = (*cells.start(), *cells.end());
        self.check_cell(first)?;
        self.check_cell(last)?;
        if last < first {
            return Ok(Vec::new());
        }
        let end = read_entry(&self.mmap, self.layout.entry_offset(last));
        let span = span_between(last, self.start_of(first), end)?;
        self.codec.decode_all(self.span_bytes(span)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CatalogType, CoordScale, StarRecord};
    use crate::index::CellHistogram;
    use crate::source::CellStar;
    use crate::writer::write_two_pass;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn star(cell: u32, ra: f64) -> CellStar {
        CellStar::new(
            cell,
            StarRecord {
                ra,
                dec: 1.5,
                mag: Some(12.25),
                ..Default::default()
            },
        )
    }

    fn build_test_catalog(records: &[CellStar]) -> NamedTempFile {
        let header =
            CatalogHeader::new("local test", 1, CatalogType::Astrometric, CoordScale::Decimal)
                .unwrap();
        let counts = CellHistogram::from_cells(records.iter().map(|r| r.cell));
        let mut file = NamedTempFile::new().unwrap();
        write_two_pass(
            file.as_file_mut(),
            &header,
            &counts,
            records.iter().cloned().map(Ok),
        )
        .unwrap();
        file.flush().unwrap();
        file
    }

    fn write_bytes(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_open_valid_catalog() {
        let file = build_test_catalog(&[star(0, 1.0), star(7, 2.0)]);
        let catalog = Catalog::open(file.path()).unwrap();
        assert_eq!(catalog.header().level, 1);
        assert_eq!(catalog.header().title, "local test");
        assert_eq!(catalog.total_records(), 2);
        assert_eq!(catalog.file_size(), 128 + 48 * 4 + 2 * 16);
    }

    #[test]
    fn test_lookup_cells() {
        let file = build_test_catalog(&[star(0, 1.0), star(7, 2.0), star(7, 3.0)]);
        let catalog = Catalog::open(file.path()).unwrap();
        assert_eq!(catalog.lookup(0).unwrap().len(), 1);
        assert!(catalog.lookup(1).unwrap().is_empty());
        let stars = catalog.lookup(7).unwrap();
        assert_eq!(stars.len(), 2);
        assert_eq!(stars[0].ra_deg(), 2.0);
        assert_eq!(stars[1].ra_deg(), 3.0);
        assert_eq!(stars[1].mag(), 12.25);
        assert_eq!(catalog.raw_records(7).unwrap().len(), 32);
    }

    #[test]
    fn test_lookup_out_of_range() {
        let file = build_test_catalog(&[star(0, 1.0)]);
        let catalog = Catalog::open(file.path()).unwrap();
        assert!(matches!(
            catalog.lookup(48),
            Err(CatalogError::CellOutOfRange {
                cell: 48,
                first_cell: 0,
                last_cell: 47
            })
        ));
    }

    #[test]
    fn test_lookup_range_flattens() {
        let file = build_test_catalog(&[star(2, 1.0), star(4, 2.0), star(4, 3.0), star(9, 4.0)]);
        let catalog = Catalog::open(file.path()).unwrap();
        let stars = catalog.lookup_range(3..=9).unwrap();
        let ras: Vec<f64> = stars.iter().map(|s| s.ra_deg()).collect();
        assert_eq!(ras, vec![2.0, 3.0, 4.0]);
        assert_eq!(catalog.lookup_range(0..=47).unwrap().len(), 4);
        assert!(catalog.lookup_range(5..=8).unwrap().is_empty());
        assert!(catalog.lookup_range(40..=48).is_err());
    }

    #[test]
    fn test_lookup_many_keeps_order() {
        let file = build_test_catalog(&[star(2, 1.0), star(4, 2.0), star(4, 3.0)]);
        let catalog = Catalog::open(file.path()).unwrap();
        let results = catalog.lookup_many(&[4, 3, 2]).unwrap();
        let counts: Vec<usize> = results.iter().map(Vec::len).collect();
        assert_eq!(counts, vec![2, 0, 1]);
    }

    #[test]
    fn test_index_copy_validates() {
        let file = build_test_catalog(&[star(2, 1.0), star(4, 2.0)]);
        let catalog = Catalog::open(file.path()).unwrap();
        let index = catalog.index().unwrap();
        assert_eq!(index.len(), 48);
        assert_eq!(index.total(), 2);
        index.validate().unwrap();
    }

    #[test]
    fn test_open_truncated_file() {
        let file = write_bytes(&[0u8; 32]);
        let msg = Catalog::open(file.path()).err().unwrap().to_string();
        assert!(msg.contains("too small"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_open_truncated_index() {
        let full = build_test_catalog(&[star(0, 1.0)]);
        let bytes = std::fs::read(full.path()).unwrap();
        let file = write_bytes(&bytes[..200]);
        let msg = Catalog::open(file.path()).err().unwrap().to_string();
        assert!(msg.contains("too small for index"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_open_truncated_data() {
        let full = build_test_catalog(&[star(0, 1.0), star(1, 2.0)]);
        let bytes = std::fs::read(full.path()).unwrap();
        let file = write_bytes(&bytes[..bytes.len() - 1]);
        let err = Catalog::open(file.path()).err().unwrap();
        assert!(matches!(err, CatalogError::Corrupt { .. }));
        assert!(err.to_string().contains("data section truncated"));
    }

    #[test]
    fn test_decreasing_index_is_corrupt() {
        let full = build_test_catalog(&[star(0, 1.0), star(1, 2.0)]);
        let mut bytes = std::fs::read(full.path()).unwrap();
        // entry for cell 1 drops below cell 0
        bytes[HEADER_SIZE + 4..HEADER_SIZE + 8].copy_from_slice(&0u32.to_le_bytes());
        let file = write_bytes(&bytes);
        let catalog = Catalog::open(file.path()).unwrap();
        assert!(matches!(
            catalog.lookup(1),
            Err(CatalogError::Corrupt { .. })
        ));
        assert!(catalog.index().unwrap().validate().is_err());
    }

    #[test]
    fn test_open_non_ascii_title() {
        let full = build_test_catalog(&[star(0, 1.0)]);
        let mut bytes = std::fs::read(full.path()).unwrap();
        bytes[..2].copy_from_slice(&[0xC3, 0xA9]);
        let file = write_bytes(&bytes);
        let catalog = Catalog::open(file.path()).unwrap();
        assert!(catalog.header().title.starts_with('é'));
        assert_eq!(catalog.lookup(0).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Catalog::open("/nonexistent/catalog.dat"),
            Err(CatalogError::Io(_))
        ));
    }
}
