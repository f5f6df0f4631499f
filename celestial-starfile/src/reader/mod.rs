//! Catalog readers.
//!
//! [`Catalog`] memory-maps a local file; [`RemoteCatalog`] reads the same
//! layout through HTTP range requests. Both implement [`CatalogReader`] and
//! return identical records for identical bytes.

pub mod local;
pub mod remote;

use std::ops::RangeInclusive;

use rayon::prelude::*;

use crate::error::CatalogResult;
use crate::format::{CatalogHeader, CatalogStar};

pub use local::Catalog;
pub use remote::{RemoteCatalog, RemoteOptions};

pub trait CatalogReader: Send + Sync {
    fn header(&self) -> &CatalogHeader;

    /// Records of one cell, in stored order.
    fn lookup(&self, cell: u32) -> CatalogResult<Vec<CatalogStar>>;

    /// Records of a contiguous run of cells, flattened in cell order.
    fn lookup_range(&self, cells: RangeInclusive<u32>) -> CatalogResult<Vec<CatalogStar>> {
        let mut stars = Vec::new();
        for cell in cells {
            stars.extend(self.lookup(cell)?);
        }
        Ok(stars)
    }

    /// Independent lookups run in parallel. Results follow the order of `cells`.
    fn lookup_many(&self, cells: &[u32]) -> CatalogResult<Vec<Vec<CatalogStar>>> {
        cells.par_iter().map(|&cell| self.lookup(cell)).collect()
    }
}

/// True for `http://` and `https://` locations.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Open a local path or an HTTP(S) URL.
pub fn open(location: &str) -> CatalogResult<Box<dyn CatalogReader>> {
    if is_remote(location) {
        Ok(Box::new(RemoteCatalog::open(location)?))
    } else {
        Ok(Box::new(Catalog::open(location)?))
    }
}
