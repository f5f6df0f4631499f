//! CLI argument definitions for forge

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use celestial_starfile::format::{CatalogType, CoordScale};

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Build and check HEALPix-indexed star catalog files")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a catalog file (or a directory of chunk files) from CSV input
    Build(BuildArgs),

    /// Check header, index and records of catalog files
    Verify(VerifyArgs),

    /// Print the header and record counts of a catalog file
    Info(InfoArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuildMode {
    /// One pass, index backpatched in place (unchunked output only)
    Streaming,
    /// Count cells first, then write index and records
    TwoPass,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    Astrometric,
    Photometric,
}

impl From<TypeArg> for CatalogType {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::Astrometric => CatalogType::Astrometric,
            TypeArg::Photometric => CatalogType::Photometric,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScaleArg {
    /// RA x 1e6, Dec x 1e5
    Decimal,
    /// (2^31 - 1) / 360 per degree
    Int32Range,
}

impl From<ScaleArg> for CoordScale {
    fn from(value: ScaleArg) -> Self {
        match value {
            ScaleArg::Decimal => CoordScale::Decimal,
            ScaleArg::Int32Range => CoordScale::Int32Range,
        }
    }
}

#[derive(Parser)]
pub struct BuildArgs {
    /// Input CSV file (optionally .gz) with a header row; needs ra and dec columns
    #[arg(long)]
    pub input: PathBuf,

    /// Output file, or output directory when chunking
    #[arg(long)]
    pub output: PathBuf,

    /// JSON build configuration; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Catalog title stored in the header (ASCII, at most 48 bytes)
    #[arg(long)]
    pub title: Option<String>,

    /// HEALPix level of the cells
    #[arg(long)]
    pub level: Option<u8>,

    #[arg(long, value_enum)]
    pub catalog_type: Option<TypeArg>,

    #[arg(long, value_enum)]
    pub coord_scale: Option<ScaleArg>,

    /// Write one file per cell at this coarser level
    #[arg(long)]
    pub chunk_level: Option<u8>,

    /// Chunk file name prefix ({prefix}_{chunk}.dat)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Write strategy; defaults to streaming for a single file, two-pass for chunks
    #[arg(long, value_enum)]
    pub mode: Option<BuildMode>,

    /// Load the whole input and sort it by cell; chunks are then written in parallel
    #[arg(long)]
    pub sort: bool,

    /// Number of threads for parallel chunk writing (0 = all cores)
    #[arg(short, long, default_value = "0")]
    pub threads: usize,
}

#[derive(Parser)]
pub struct VerifyArgs {
    /// Catalog files; several chunk files are also checked for overlap
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Decode every record instead of a sample of cells
    #[arg(long)]
    pub full: bool,
}

#[derive(Parser)]
pub struct InfoArgs {
    /// Catalog file
    pub path: PathBuf,
}
