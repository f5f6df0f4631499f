//! Check catalog files: header, index monotonicity, file length and a decode
//! of sampled (or all) cells. Several chunk files are also checked for
//! overlapping cell ranges.

use crate::cli::{Cli, VerifyArgs};
use anyhow::Context;
use std::path::{Path, PathBuf};

use celestial_starfile::healpix::{self, Tessellation};
use celestial_starfile::index::CumulativeIndex;
use celestial_starfile::reader::{Catalog, CatalogReader};

struct FileReport {
    path: PathBuf,
    level: u8,
    chunk: Option<(u8, u32)>,
    first_cell: u32,
    last_cell: u32,
    records: u32,
}

pub fn run(args: &VerifyArgs, cli: &Cli) -> anyhow::Result<()> {
    let mut reports = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let report =
            verify_file(path, args.full, cli.verbose).with_context(|| format!("{:?}", path))?;
        reports.push(report);
    }
    if reports.len() > 1 {
        check_chunk_set(&reports)?;
    }
    let records: u64 = reports.iter().map(|r| r.records as u64).sum();
    println!(
        "Validation passed: {} file(s), {} records.",
        reports.len(),
        records
    );
    Ok(())
}

fn verify_file(path: &Path, full: bool, verbose: bool) -> anyhow::Result<FileReport> {
    let catalog = Catalog::open(path)?;
    let header = catalog.header();
    println!(
        "{:?}: {} level {}, cells [{}, {}]",
        path, header.catalog_type, header.level, header.first_cell, header.last_cell
    );

    let index = catalog.index()?;
    index.validate()?;
    if index.len() != header.cell_span() as usize {
        anyhow::bail!(
            "index has {} entries, header range needs {}",
            index.len(),
            header.cell_span()
        );
    }

    let tessellation = header.tessellation()?;
    let cells = if full {
        occupied_cells(&index)
    } else {
        pick_sample_cells(&occupied_cells(&index))
    };
    let mut displaced = 0usize;
    for cell in cells {
        displaced += verify_cell(&catalog, &tessellation, cell, verbose)?;
    }
    if displaced > 0 {
        println!(
            "  {} records decode to a position outside their cell (edge truncation)",
            displaced
        );
    }

    Ok(FileReport {
        path: path.to_path_buf(),
        level: header.level,
        chunk: header.chunk.map(|c| (c.level, c.cell)),
        first_cell: header.first_cell,
        last_cell: header.last_cell,
        records: index.total(),
    })
}

fn occupied_cells(index: &CumulativeIndex) -> Vec<u32> {
    let mut previous = 0;
    let mut cells = Vec::new();
    for (slot, &entry) in index.entries().iter().enumerate() {
        if entry > previous {
            cells.push(index.first_cell() + slot as u32);
        }
        previous = entry;
    }
    cells
}

fn pick_sample_cells(occupied: &[u32]) -> Vec<u32> {
    let mut samples = Vec::new();
    if let Some(&first) = occupied.first() {
        samples.push(first);
    }
    if occupied.len() > 1 {
        samples.push(occupied[occupied.len() / 2]);
    }
    if occupied.len() > 2 {
        samples.push(occupied[occupied.len() - 1]);
    }
    samples
}

/// Decode one cell; returns how many records sit outside the cell by position.
fn verify_cell(
    catalog: &Catalog,
    tessellation: &Tessellation,
    cell: u32,
    verbose: bool,
) -> anyhow::Result<usize> {
    let stars = catalog.lookup(cell)?;
    let displaced = stars
        .iter()
        .filter(|s| tessellation.cell_of(s.ra_deg(), s.dec_deg()) != cell)
        .count();
    if verbose {
        println!("  Cell {}: {} records decoded", cell, stars.len());
    }
    Ok(displaced)
}

/// Chunk files of one catalog must share a level and never overlap.
fn check_chunk_set(reports: &[FileReport]) -> anyhow::Result<()> {
    let mut chunked: Vec<&FileReport> = reports.iter().filter(|r| r.chunk.is_some()).collect();
    if chunked.len() != reports.len() {
        println!("Mixed chunked and unchunked files: skipping chunk set checks");
        return Ok(());
    }
    if let Some(other) = chunked.iter().find(|r| r.level != chunked[0].level) {
        anyhow::bail!(
            "{:?} has level {}, {:?} has level {}",
            other.path,
            other.level,
            chunked[0].path,
            chunked[0].level
        );
    }
    chunked.sort_by_key(|r| r.chunk);
    for pair in chunked.windows(2) {
        if pair[0].chunk == pair[1].chunk {
            anyhow::bail!("{:?} and {:?} hold the same chunk", pair[0].path, pair[1].path);
        }
        let (a, b) = (pair[0], pair[1]);
        if a.records > 0 && b.records > 0 && b.first_cell <= a.last_cell {
            anyhow::bail!(
                "{:?} [{}, {}] overlaps {:?} [{}, {}]",
                a.path,
                a.first_cell,
                a.last_cell,
                b.path,
                b.first_cell,
                b.last_cell
            );
        }
    }
    if let Some((chunk_level, _)) = chunked[0].chunk {
        let expected = healpix::cell_count(chunk_level) as usize;
        println!("Chunks present: {} of {}", chunked.len(), expected);
    }
    Ok(())
}
