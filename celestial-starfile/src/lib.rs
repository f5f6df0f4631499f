//! HEALPix-indexed star catalog files.
//!
//! Packs a large star catalog (position, proper motion, temperature,
//! magnitude, optional 343-channel XP sampled spectrum) into fixed-size
//! records grouped by nested HEALPix cell, behind a cumulative per-cell index.
//! Reading every star of one cell costs two index entries and one contiguous
//! slice, which works equally well against a memory-mapped file and against
//! an HTTP server honouring range requests.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`healpix`] | Nested cell ids, parent/children, [`ang2pix_nest`](healpix::ang2pix_nest) |
//! | [`format`] | [`CatalogHeader`](format::CatalogHeader), [`RecordCodec`](format::RecordCodec), [`Flux`](format::Flux), byte layout |
//! | [`index`] | [`CumulativeIndex`](index::CumulativeIndex), [`StreamingIndex`](index::StreamingIndex), [`CellCounts`](index::CellCounts) |
//! | [`writer`] | Streaming, two-pass and chunked writers |
//! | [`reader`] | [`Catalog`](reader::Catalog) (mmap) and [`RemoteCatalog`](reader::RemoteCatalog) (HTTP) |
//! | [`source`] | [`CellStar`](source::CellStar) input records |
//! | [`config`] | [`BuildConfig`](config::BuildConfig) JSON settings |
//!
//! # Quick Start
//!
//! ```ignore
//! use celestial_starfile::reader::{Catalog, CatalogReader};
//!
//! let catalog = Catalog::open("siril_cat_healpix8_astro.dat")?;
//! for star in catalog.lookup(5000)? {
//!     println!("{:.6} {:+.5} G={:.3}", star.ra_deg(), star.dec_deg(), star.mag());
//! }
//! ```
//!
//! # Binary Format
//!
//! A 128-byte header, then `last_cell - first_cell + 1` little-endian `u32`
//! cumulative counts, then the records in cell order. Astrometric records are
//! 16 bytes, photometric records 701 bytes. Chunked catalogs are one such file
//! per coarse cell, each covering only the fine cells it holds.
//!
//! # Features
//!
//! - **`cli`**: builds the `forge` and `query-starfile` binaries.

pub mod config;
pub mod error;
pub mod format;
pub mod healpix;
pub mod index;
pub mod reader;
pub mod source;
pub mod writer;

pub use error::{CatalogError, CatalogResult};
pub use format::{CatalogHeader, CatalogStar, CatalogType, CoordScale, StarRecord};
pub use reader::{Catalog, CatalogReader, RemoteCatalog};
pub use source::CellStar;
