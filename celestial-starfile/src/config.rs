//! Build settings, loadable from a JSON file.
//!
//! ```json
//! {
//!   "title": "Siril Gaia DR3 photometric extract",
//!   "level": 8,
//!   "catalog_type": "photometric",
//!   "coord_scale": "int32_range",
//!   "chunk_level": 2,
//!   "prefix": "siril_cat2_healpix8_xpsamp"
//! }
//! ```
//!
//! Omitted fields take the [`Default`] values.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::format::{CatalogHeader, CatalogType, CoordScale, DEFAULT_FORMAT_VERSION};
use crate::writer::ChunkPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub title: String,
    pub format_version: u8,
    pub level: u8,
    pub catalog_type: CatalogType,
    /// Defaults to the scale historically used for the catalog type.
    pub coord_scale: Option<CoordScale>,
    /// Split output into one file per cell at this level.
    pub chunk_level: Option<u8>,
    /// File name stem; chunk files are `{prefix}_{chunk}.dat`.
    pub prefix: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            title: "Gaia DR3 star catalog".to_string(),
            format_version: DEFAULT_FORMAT_VERSION,
            level: 8,
            catalog_type: CatalogType::Astrometric,
            coord_scale: None,
            chunk_level: None,
            prefix: "catalog".to_string(),
        }
    }
}

impl BuildConfig {
    pub fn from_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| CatalogError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> CatalogResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| CatalogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn coord_scale(&self) -> CoordScale {
        self.coord_scale.unwrap_or(match self.catalog_type {
            CatalogType::Astrometric => CoordScale::Decimal,
            _ => CoordScale::Int32Range,
        })
    }

    pub fn validate(&self) -> CatalogResult<()> {
        self.header()?;
        self.chunk_plan()?;
        Ok(())
    }

    /// Unchunked header; chunk headers are derived from it.
    pub fn header(&self) -> CatalogResult<CatalogHeader> {
        let mut header = CatalogHeader::new(
            self.title.clone(),
            self.level,
            self.catalog_type,
            self.coord_scale(),
        )?;
        header.format_version = self.format_version;
        header.codec()?;
        Ok(header)
    }

    pub fn chunk_plan(&self) -> CatalogResult<Option<ChunkPlan>> {
        self.chunk_level
            .map(|chunk_level| ChunkPlan::new(self.level, chunk_level))
            .transpose()
    }

    /// Output file name for an unchunked build.
    pub fn file_name(&self) -> String {
        format!("{}.dat", self.prefix)
    }
}
