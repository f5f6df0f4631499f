//! Build catalog files from a CSV star list.
//!
//! Unchunked output is streamed in one pass by default. Chunked output and
//! `--mode two-pass` read the input twice: once to count records per cell,
//! once to write. With `--sort` the input is loaded, sorted by cell and, for
//! chunked output, written with one task per chunk.

use crate::cli::{BuildArgs, BuildMode, Cli};
use crate::csv_source::read_stars;
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use celestial_starfile::config::BuildConfig;
use celestial_starfile::format::CatalogHeader;
use celestial_starfile::healpix::Tessellation;
use celestial_starfile::index::CellHistogram;
use celestial_starfile::source::VecSource;
use celestial_starfile::writer::{
    write_chunked, write_chunked_parallel, write_streaming, write_two_pass, ChunkPlan,
    WriteSummary,
};
use celestial_starfile::{CatalogResult, CellStar};

struct BuildStats {
    files: usize,
    empty_files: usize,
    records: u64,
    occupied_cells: u64,
    bytes: u64,
    elapsed_secs: f64,
}

pub fn run(args: &BuildArgs, cli: &Cli) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let header = config.header()?;
    let plan = config.chunk_plan()?;
    let mode = resolve_mode(args.mode, plan.is_some())?;
    validate_paths(args, plan.is_some())?;
    print_plan(args, &config, mode, cli);
    configure_thread_pool(args.threads)?;

    let start = Instant::now();
    let summaries = match plan {
        None => vec![build_single(args, &header, mode)?],
        Some(plan) => build_chunked(args, &config, &header, &plan)?,
    };
    let stats = compute_stats(&summaries, start.elapsed().as_secs_f64());
    print_stats(&stats);
    Ok(())
}

fn resolve_config(args: &BuildArgs) -> anyhow::Result<BuildConfig> {
    let mut config = match &args.config {
        Some(path) => BuildConfig::from_file(path)
            .with_context(|| format!("Failed to load build config {:?}", path))?,
        None => BuildConfig::default(),
    };
    if let Some(title) = &args.title {
        config.title = title.clone();
    }
    if let Some(level) = args.level {
        config.level = level;
    }
    if let Some(catalog_type) = args.catalog_type {
        config.catalog_type = catalog_type.into();
    }
    if let Some(scale) = args.coord_scale {
        config.coord_scale = Some(scale.into());
    }
    if let Some(chunk_level) = args.chunk_level {
        config.chunk_level = Some(chunk_level);
    }
    if let Some(prefix) = &args.prefix {
        config.prefix = prefix.clone();
    }
    config.validate().context("Invalid build settings")?;
    Ok(config)
}

fn resolve_mode(mode: Option<BuildMode>, chunked: bool) -> anyhow::Result<BuildMode> {
    match (mode, chunked) {
        (Some(BuildMode::Streaming), true) => {
            anyhow::bail!("Chunked output needs --mode two-pass: each chunk's index is written first")
        }
        (Some(mode), _) => Ok(mode),
        (None, true) => Ok(BuildMode::TwoPass),
        (None, false) => Ok(BuildMode::Streaming),
    }
}

fn validate_paths(args: &BuildArgs, chunked: bool) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {:?}", args.input);
    }
    let dir = if chunked {
        Some(args.output.as_path())
    } else {
        args.output.parent().filter(|p| !p.as_os_str().is_empty())
    };
    if let Some(dir) = dir {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

fn print_plan(args: &BuildArgs, config: &BuildConfig, mode: BuildMode, cli: &Cli) {
    println!("=== Build Star Catalog ===");
    println!("Input: {:?}", args.input);
    println!("Output: {:?}", args.output);
    println!("Title: {}", config.title);
    println!("Catalog type: {}", config.catalog_type);
    println!("HEALPix level: {}", config.level);
    println!("Coordinate scale: {:?}", config.coord_scale());
    match config.chunk_level {
        Some(level) => println!("Chunks: level {} ({}_<chunk>.dat)", level, config.prefix),
        None => println!("Chunks: none"),
    }
    let mode = match mode {
        BuildMode::Streaming => "streaming",
        BuildMode::TwoPass => "two-pass",
    };
    println!("Mode: {}{}", mode, if args.sort { ", sorted in memory" } else { "" });
    println!("Verbose: {}", cli.verbose);
    println!();
}

fn configure_thread_pool(threads: usize) -> anyhow::Result<()> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if threads > 0 {
        builder = builder.num_threads(threads);
    }
    if builder.build_global().is_err() {
        warn!("rayon thread pool already initialised");
    }
    Ok(())
}

fn build_single(
    args: &BuildArgs,
    header: &CatalogHeader,
    mode: BuildMode,
) -> anyhow::Result<WriteSummary> {
    let temp_path = temp_path(&args.output);
    let result = write_single(args, header, mode, &temp_path);
    match result {
        Ok(summary) => {
            fs::rename(&temp_path, &args.output)?;
            info!(path = ?args.output, records = summary.records, "catalog written");
            Ok(summary)
        }
        Err(e) => {
            if temp_path.exists() {
                fs::remove_file(&temp_path).ok();
            }
            Err(e.context(sort_hint(args)))
        }
    }
}

fn write_single(
    args: &BuildArgs,
    header: &CatalogHeader,
    mode: BuildMode,
    temp_path: &Path,
) -> anyhow::Result<WriteSummary> {
    let tessellation = header.tessellation()?;
    let sorted = if args.sort {
        Some(load_sorted(&args.input, tessellation)?)
    } else {
        None
    };
    let counts = match (&sorted, mode) {
        (Some(source), BuildMode::TwoPass) => Some(source.histogram()),
        (None, BuildMode::TwoPass) => Some(count_cells(&args.input, tessellation)?),
        (_, BuildMode::Streaming) => None,
    };

    let file =
        File::create(temp_path).with_context(|| format!("Failed to create {:?}", temp_path))?;
    let pb = create_spinner("Writing records");
    let summary = match (&sorted, &counts) {
        (Some(source), None) => {
            write_streaming(file, header.clone(), source.iter().inspect(|_| pb.inc(1)))
        }
        (Some(source), Some(counts)) => {
            write_two_pass(file, header, counts, source.iter().inspect(|_| pb.inc(1)))
        }
        (None, None) => write_streaming(
            file,
            header.clone(),
            read_stars(&args.input, tessellation)?.inspect(|_| pb.inc(1)),
        ),
        (None, Some(counts)) => write_two_pass(
            file,
            header,
            counts,
            read_stars(&args.input, tessellation)?.inspect(|_| pb.inc(1)),
        ),
    };
    pb.finish_and_clear();
    Ok(summary?)
}

fn build_chunked(
    args: &BuildArgs,
    config: &BuildConfig,
    header: &CatalogHeader,
    plan: &ChunkPlan,
) -> anyhow::Result<Vec<WriteSummary>> {
    let tessellation = header.tessellation()?;
    let outputs = if args.sort {
        let source = load_sorted(&args.input, tessellation)?;
        println!("Writing {} chunks in parallel...", plan.chunks().len());
        write_chunked_parallel(&args.output, &config.prefix, header, plan, &source)?
    } else {
        let counts = count_cells(&args.input, tessellation)?;
        println!("Writing {} chunks...", plan.chunks().len());
        let pb = create_spinner("Writing records");
        let outputs = write_chunked(
            &args.output,
            &config.prefix,
            header,
            plan,
            &counts,
            read_stars(&args.input, tessellation)?.inspect(|_| pb.inc(1)),
        );
        pb.finish_and_clear();
        outputs.context(sort_hint(args))?
    };
    Ok(outputs.into_iter().map(|o| o.summary).collect())
}

fn sort_hint(args: &BuildArgs) -> &'static str {
    if args.sort {
        "Build failed"
    } else {
        "Build failed (input must be sorted by cell unless --sort is given)"
    }
}

/// First pass: records per cell.
fn count_cells(input: &Path, tessellation: Tessellation) -> anyhow::Result<CellHistogram> {
    println!("Pass 1: Counting records per cell...");
    let pb = create_spinner("Counting");
    let mut counts = CellHistogram::new();
    for record in read_stars(input, tessellation)? {
        counts.add(record?.cell);
        pb.inc(1);
    }
    pb.finish_and_clear();
    println!(
        "  {} records in {} cells",
        counts.total(),
        counts.occupied_cells()
    );
    println!("Pass 2: Writing...");
    Ok(counts)
}

fn load_sorted(input: &Path, tessellation: Tessellation) -> anyhow::Result<VecSource> {
    println!("Loading and sorting input...");
    let records = read_stars(input, tessellation)?.collect::<CatalogResult<Vec<CellStar>>>()?;
    Ok(VecSource::sorted(records))
}

fn temp_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    output.with_file_name(name)
}

fn create_spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} {pos} ({per_sec})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb
}

fn compute_stats(summaries: &[WriteSummary], elapsed_secs: f64) -> BuildStats {
    BuildStats {
        files: summaries.len(),
        empty_files: summaries.iter().filter(|s| s.records == 0).count(),
        records: summaries.iter().map(|s| s.records as u64).sum(),
        occupied_cells: summaries.iter().map(|s| s.occupied_cells as u64).sum(),
        bytes: summaries.iter().map(|s| s.bytes).sum(),
        elapsed_secs,
    }
}

fn print_stats(stats: &BuildStats) {
    println!();
    println!("=== Build Statistics ===");
    println!("Files written: {}", stats.files);
    if stats.files > 1 {
        println!("Empty chunks: {}", stats.empty_files);
    }
    println!("Records: {}", stats.records);
    println!("Occupied cells: {}", stats.occupied_cells);
    if stats.occupied_cells > 0 {
        println!(
            "Mean records per occupied cell: {:.1}",
            stats.records as f64 / stats.occupied_cells as f64
        );
    }
    println!(
        "Output size: {} bytes ({:.2} GB)",
        stats.bytes,
        stats.bytes as f64 / 1_073_741_824.0
    );
    println!("Elapsed time: {:.2}s", stats.elapsed_secs);
}
