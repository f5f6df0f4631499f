//! Catalog writers.
//!
//! Three ways to produce a file, all from a record stream sorted by cell:
//!
//! - [`StreamingWriter`]: one pass. The index is reserved as zeros up front and
//!   each slot is overwritten once its cell is closed, so the sink must seek.
//! - [`write_two_pass`]: per-cell counts are known first, the index is written
//!   whole and records are appended. Works on any `Write`.
//! - [`write_chunk`] / [`write_chunked`]: one self-contained two-pass file per
//!   coarse cell of a [`ChunkPlan`].
//!
//! A failed write leaves a partial file that must be discarded.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::iter::Peekable;
use std::ops::{Range, RangeInclusive};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, CatalogResult};
use crate::format::{CatalogHeader, CatalogLayout, ChunkInfo, RecordCodec, INDEX_ENTRY_SIZE};
use crate::healpix::{self, Tessellation};
use crate::index::{CellCounts, CumulativeIndex, SlotPatch, StreamingIndex};
use crate::source::{CellStar, VecSource};

const ZERO_BLOCK: usize = 64 * 1024;

/// What a writer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub first_cell: u32,
    pub last_cell: u32,
    pub index_entries: u32,
    pub records: u32,
    pub occupied_cells: u32,
    pub bytes: u64,
}

/// Single-pass writer with in-place index backpatching.
pub struct StreamingWriter<W: Write + Seek> {
    sink: BufWriter<W>,
    header: CatalogHeader,
    codec: RecordCodec,
    layout: CatalogLayout,
    index: StreamingIndex,
    record: Vec<u8>,
    position: u64,
    current: Option<u32>,
    occupied: u32,
}

impl<W: Write + Seek> StreamingWriter<W> {
    /// Write the header and a zeroed index. The sink is written from offset 0.
    pub fn new(sink: W, header: CatalogHeader) -> CatalogResult<Self> {
        header.validate()?;
        let codec = header.codec()?;
        let layout = CatalogLayout::of(&header)?;
        let mut sink = BufWriter::new(sink);
        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&header.to_bytes())?;
        write_zeros(&mut sink, layout.index_len())?;
        debug!(
            entries = layout.index_entries,
            data_offset = layout.data_offset(),
            "reserved index"
        );
        Ok(Self {
            sink,
            index: StreamingIndex::new(header.first_cell, header.last_cell),
            record: vec![0u8; codec.record_size()],
            position: layout.data_offset(),
            current: None,
            occupied: 0,
            header,
            codec,
            layout,
        })
    }

    pub fn header(&self) -> &CatalogHeader {
        &self.header
    }

    /// Append one record. Rejected records leave the file untouched.
    pub fn push(&mut self, record: &CellStar) -> CatalogResult<()> {
        self.codec.encode_into(&record.star, &mut self.record)?;
        if let Some(patch) = self.index.advance(record.cell)? {
            self.backpatch(&patch)?;
        }
        if self.current != Some(record.cell) {
            self.current = Some(record.cell);
            self.occupied += 1;
        }
        self.sink.write_all(&self.record)?;
        self.position += self.record.len() as u64;
        Ok(())
    }

    /// Patch the trailing slots and flush.
    pub fn finish(mut self) -> CatalogResult<WriteSummary> {
        let records = self.index.total();
        let patch = self.index.clone().finish();
        self.backpatch(&patch)?;
        self.sink.flush()?;
        let summary = WriteSummary {
            first_cell: self.header.first_cell,
            last_cell: self.header.last_cell,
            index_entries: self.layout.index_entries,
            records,
            occupied_cells: self.occupied,
            bytes: self.position,
        };
        info!(
            records = summary.records,
            cells = summary.occupied_cells,
            bytes = summary.bytes,
            "streaming write complete"
        );
        Ok(summary)
    }

    fn backpatch(&mut self, patch: &SlotPatch) -> CatalogResult<()> {
        // Reserved slots are already zero.
        if patch.slots.is_empty() || patch.value == 0 {
            return Ok(());
        }
        let offset = self.layout.index_offset() + patch.slots.start as u64 * INDEX_ENTRY_SIZE as u64;
        let bytes = patch.value.to_le_bytes().repeat(patch.slots.len());
        self.sink.seek(SeekFrom::Start(offset))?;
        self.sink.write_all(&bytes)?;
        self.sink.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }
}

/// Drive a [`StreamingWriter`] over a whole record stream.
pub fn write_streaming<W, I>(sink: W, header: CatalogHeader, records: I) -> CatalogResult<WriteSummary>
where
    W: Write + Seek,
    I: IntoIterator<Item = CatalogResult<CellStar>>,
{
    let mut writer = StreamingWriter::new(sink, header)?;
    for record in records {
        writer.push(&record?)?;
    }
    writer.finish()
}

/// Write a file whose index comes from `counts`.
///
/// The record stream must agree with the counts cell by cell.
pub fn write_two_pass<W, C, I>(
    sink: W,
    header: &CatalogHeader,
    counts: &C,
    records: I,
) -> CatalogResult<WriteSummary>
where
    W: Write,
    C: CellCounts + ?Sized,
    I: IntoIterator<Item = CatalogResult<CellStar>>,
{
    header.validate()?;
    let codec = header.codec()?;
    let layout = CatalogLayout::of(header)?;
    let index = CumulativeIndex::from_counts(
        header.first_cell,
        cells_of(header).map(|cell| counts.count_in_cell(cell)),
    )?;

    let mut sink = BufWriter::new(sink);
    sink.write_all(&header.to_bytes())?;
    sink.write_all(&index.to_le_bytes())?;

    let mut order = StreamingIndex::new(header.first_cell, header.last_cell);
    let mut buf = vec![0u8; codec.record_size()];
    let mut current: Option<(u32, u32)> = None;
    let mut occupied = 0u32;
    for record in records {
        let record = record?;
        codec.encode_into(&record.star, &mut buf)?;
        let expected = counts.count_in_cell(record.cell);
        let seen = match current {
            Some((cell, seen)) if cell == record.cell => seen + 1,
            Some((cell, seen)) => {
                check_cell_count(cell, seen, counts.count_in_cell(cell))?;
                1
            }
            None => 1,
        };
        if seen > expected {
            return Err(count_mismatch(record.cell, seen, expected));
        }
        order.advance(record.cell)?;
        if seen == 1 {
            occupied += 1;
        }
        current = Some((record.cell, seen));
        sink.write_all(&buf)?;
    }
    if let Some((cell, seen)) = current {
        check_cell_count(cell, seen, counts.count_in_cell(cell))?;
    }
    if order.total() != index.total() {
        return Err(CatalogError::malformed(format!(
            "record stream has {} records, counts promise {}",
            order.total(),
            index.total()
        )));
    }
    sink.flush()?;

    let summary = WriteSummary {
        first_cell: header.first_cell,
        last_cell: header.last_cell,
        index_entries: layout.index_entries,
        records: index.total(),
        occupied_cells: occupied,
        bytes: layout.file_len(index.total()),
    };
    debug!(
        first = summary.first_cell,
        last = summary.last_cell,
        records = summary.records,
        "two-pass write complete"
    );
    Ok(summary)
}

fn cells_of(header: &CatalogHeader) -> RangeInclusive<u32> {
    header.first_cell..=header.last_cell
}

fn check_cell_count(cell: u32, seen: u32, expected: u32) -> CatalogResult<()> {
    if seen != expected {
        return Err(count_mismatch(cell, seen, expected));
    }
    Ok(())
}

fn count_mismatch(cell: u32, seen: u32, expected: u32) -> CatalogError {
    CatalogError::malformed(format!(
        "cell {} has {} records, counts promise {}",
        cell, seen, expected
    ))
}

fn write_zeros<W: Write>(sink: &mut W, mut len: u64) -> CatalogResult<()> {
    let block = [0u8; ZERO_BLOCK];
    while len > 0 {
        let n = len.min(ZERO_BLOCK as u64) as usize;
        sink.write_all(&block[..n])?;
        len -= n as u64;
    }
    Ok(())
}

/// Partition of a tessellation into coarse chunk cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    level: u8,
    chunk_level: u8,
}

impl ChunkPlan {
    pub fn new(level: u8, chunk_level: u8) -> CatalogResult<Self> {
        Tessellation::new(level)?;
        if chunk_level > level {
            return Err(CatalogError::Config(format!(
                "chunk level {} is deeper than cell level {}",
                chunk_level, level
            )));
        }
        Ok(Self { level, chunk_level })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn chunk_level(&self) -> u8 {
        self.chunk_level
    }

    pub fn chunks(&self) -> Range<u32> {
        0..healpix::cell_count(self.chunk_level)
    }

    pub fn chunk_of(&self, cell: u32) -> u32 {
        healpix::parent_cell(cell, self.level, self.chunk_level)
    }

    pub fn span(&self, chunk: u32) -> RangeInclusive<u32> {
        healpix::children(chunk, self.chunk_level, self.level)
    }

    pub fn info(&self, chunk: u32) -> ChunkInfo {
        ChunkInfo {
            level: self.chunk_level,
            cell: chunk,
        }
    }

    /// Header for `chunk`, narrowed to the occupied cells inside its span.
    pub fn chunk_header<C: CellCounts + ?Sized>(
        &self,
        template: &CatalogHeader,
        chunk: u32,
        counts: &C,
    ) -> CatalogHeader {
        let span = self.span(chunk);
        let (first, last) = counts
            .occupied_range(*span.start(), *span.end())
            .unwrap_or((span.end() + 1, *span.end()));
        template.for_chunk(self.info(chunk), first, last)
    }
}

pub fn chunk_file_name(prefix: &str, chunk: u32) -> String {
    format!("{}_{}.dat", prefix, chunk)
}

/// One written chunk file.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub chunk: u32,
    pub path: PathBuf,
    pub summary: WriteSummary,
}

/// Write the file for one chunk. `records` must hold exactly the chunk's records.
pub fn write_chunk<W, C, I>(
    sink: W,
    template: &CatalogHeader,
    plan: &ChunkPlan,
    chunk: u32,
    counts: &C,
    records: I,
) -> CatalogResult<WriteSummary>
where
    W: Write,
    C: CellCounts + ?Sized,
    I: IntoIterator<Item = CatalogResult<CellStar>>,
{
    if template.level != plan.level() {
        return Err(CatalogError::Config(format!(
            "header level {} does not match chunk plan level {}",
            template.level,
            plan.level()
        )));
    }
    let header = plan.chunk_header(template, chunk, counts);
    write_two_pass(sink, &header, counts, records)
}

/// Write every chunk of `plan` from one sorted stream, in chunk order.
pub fn write_chunked<C, I>(
    dir: &Path,
    prefix: &str,
    template: &CatalogHeader,
    plan: &ChunkPlan,
    counts: &C,
    records: I,
) -> CatalogResult<Vec<ChunkOutput>>
where
    C: CellCounts + ?Sized,
    I: IntoIterator<Item = CatalogResult<CellStar>>,
{
    let mut records = records.into_iter().peekable();
    let mut outputs = Vec::with_capacity(plan.chunks().len());
    for chunk in plan.chunks() {
        if let Some(Ok(next)) = records.peek() {
            if plan.chunk_of(next.cell) < chunk {
                return Err(CatalogError::malformed(format!(
                    "cell ids not sorted: {} appears after chunk {}",
                    next.cell,
                    chunk - 1
                )));
            }
        }
        let chunk_records = ChunkRecords {
            inner: &mut records,
            plan,
            chunk,
        };
        let path = dir.join(chunk_file_name(prefix, chunk));
        let summary = write_chunk_file(&path, |file| {
            write_chunk(file, template, plan, chunk, counts, chunk_records)
        })?;
        outputs.push(ChunkOutput {
            chunk,
            path,
            summary,
        });
    }
    match records.next() {
        None => {}
        Some(Err(e)) => return Err(e),
        Some(Ok(extra)) => {
            return Err(CatalogError::malformed(format!(
                "cell {} outside the tessellation or out of order",
                extra.cell
            )))
        }
    }
    log_chunk_totals(&outputs);
    Ok(outputs)
}

/// Write every chunk concurrently from an in-memory, sorted source.
pub fn write_chunked_parallel(
    dir: &Path,
    prefix: &str,
    template: &CatalogHeader,
    plan: &ChunkPlan,
    source: &VecSource,
) -> CatalogResult<Vec<ChunkOutput>> {
    let counts = source.histogram();
    if let Some(pair) = source.records().windows(2).find(|w| w[1].cell < w[0].cell) {
        return Err(CatalogError::malformed(format!(
            "cell ids not sorted: {} after {}",
            pair[1].cell, pair[0].cell
        )));
    }
    let outputs = plan
        .chunks()
        .into_par_iter()
        .map(|chunk| -> CatalogResult<ChunkOutput> {
            let span = plan.span(chunk);
            let records = source.cell_range(*span.start(), *span.end());
            let path = dir.join(chunk_file_name(prefix, chunk));
            let summary = write_chunk_file(&path, |file| {
                write_chunk(
                    file,
                    template,
                    plan,
                    chunk,
                    &counts,
                    records.iter().cloned().map(Ok),
                )
            })?;
            Ok(ChunkOutput {
                chunk,
                path,
                summary,
            })
        })
        .collect::<CatalogResult<Vec<_>>>()?;
    let written: u64 = outputs.iter().map(|o| o.summary.records as u64).sum();
    if written != source.len() as u64 {
        return Err(CatalogError::malformed(format!(
            "{} records fall outside the tessellation",
            source.len() as u64 - written
        )));
    }
    log_chunk_totals(&outputs);
    Ok(outputs)
}

fn log_chunk_totals(outputs: &[ChunkOutput]) {
    let records: u64 = outputs.iter().map(|o| o.summary.records as u64).sum();
    let empty = outputs.iter().filter(|o| o.summary.records == 0).count();
    info!(chunks = outputs.len(), empty, records, "chunked write complete");
}

/// Write through a `.tmp` sibling and rename into place on success.
fn write_chunk_file<F>(path: &Path, write: F) -> CatalogResult<WriteSummary>
where
    F: FnOnce(File) -> CatalogResult<WriteSummary>,
{
    let tmp = path.with_extension("dat.tmp");
    let result = File::create(&tmp)
        .map_err(CatalogError::from)
        .and_then(write);
    match result {
        Ok(summary) => {
            fs::rename(&tmp, path)?;
            debug!(path = %path.display(), records = summary.records, "chunk written");
            Ok(summary)
        }
        Err(e) => {
            if let Err(remove) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %remove, "could not remove partial chunk");
            }
            Err(e)
        }
    }
}

/// Records of one chunk, taken from the front of a shared sorted stream.
struct ChunkRecords<'a, I: Iterator<Item = CatalogResult<CellStar>>> {
    inner: &'a mut Peekable<I>,
    plan: &'a ChunkPlan,
    chunk: u32,
}

impl<I: Iterator<Item = CatalogResult<CellStar>>> Iterator for ChunkRecords<'_, I> {
    type Item = CatalogResult<CellStar>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Ok(next) = self.inner.peek()? {
            if self.plan.chunk_of(next.cell) != self.chunk {
                return None;
            }
        }
        self.inner.next()
    }
}
