//! The 128-byte catalog header.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 48 | title, ASCII, NUL padded |
//! | 48 | 1 | format version (data release) |
//! | 49 | 1 | HEALPix level of the cells |
//! | 50 | 1 | catalog type |
//! | 51 | 1 | chunked flag |
//! | 52 | 1 | chunk level |
//! | 53 | 4 | chunk cell |
//! | 57 | 4 | first cell |
//! | 61 | 4 | last cell |
//! | 65 | 1 | coordinate encoding |
//! | 66 | 62 | reserved |
//!
//! Unchunked files leave bytes 51..66 zero and cover the whole tessellation.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

use super::record::RecordCodec;
use crate::error::{CatalogError, CatalogResult};
use crate::healpix::{self, Tessellation};

pub const HEADER_SIZE: usize = 128;
pub const TITLE_SIZE: usize = 48;
/// Gaia DR3.
pub const DEFAULT_FORMAT_VERSION: u8 = 3;

const OFF_VERSION: usize = 48;
const OFF_LEVEL: usize = 49;
const OFF_TYPE: usize = 50;
const OFF_CHUNKED: usize = 51;
const OFF_CHUNK_LEVEL: usize = 52;
const OFF_CHUNK_CELL: usize = 53;
const OFF_FIRST_CELL: usize = 57;
const OFF_LAST_CELL: usize = 61;
const OFF_ENCODING: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogType {
    /// Position, proper motion, temperature and magnitude.
    Astrometric,
    /// Astrometry plus a 343-channel XP sampled spectrum.
    Photometric,
    /// XP continuous coefficients. Recognised in headers but not decodable.
    PhotometricContinuous,
}

impl CatalogType {
    pub fn from_u8(value: u8) -> CatalogResult<Self> {
        match value {
            1 => Ok(Self::Astrometric),
            2 => Ok(Self::Photometric),
            3 => Ok(Self::PhotometricContinuous),
            other => Err(CatalogError::UnsupportedCatalogType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Astrometric => 1,
            Self::Photometric => 2,
            Self::PhotometricContinuous => 3,
        }
    }

    /// Scale used by files written before the encoding byte existed.
    fn legacy_scale(self) -> CoordScale {
        match self {
            Self::Astrometric => CoordScale::Decimal,
            Self::Photometric | Self::PhotometricContinuous => CoordScale::Int32Range,
        }
    }
}

impl fmt::Display for CatalogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Astrometric => "astrometric",
            Self::Photometric => "photometric (XP sampled)",
            Self::PhotometricContinuous => "photometric (XP continuous)",
        };
        f.write_str(name)
    }
}

/// Fixed-point convention for RA/Dec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordScale {
    /// RA × 10^6, Dec × 10^5.
    Decimal,
    /// Both × (2^31 − 1) / 360.
    Int32Range,
}

pub const INT32_RANGE_SCALE: f64 = i32::MAX as f64 / 360.0;

impl CoordScale {
    pub fn ra_factor(self) -> f64 {
        match self {
            Self::Decimal => 1_000_000.0,
            Self::Int32Range => INT32_RANGE_SCALE,
        }
    }

    pub fn dec_factor(self) -> f64 {
        match self {
            Self::Decimal => 100_000.0,
            Self::Int32Range => INT32_RANGE_SCALE,
        }
    }

    fn encoding_byte(self) -> u8 {
        match self {
            Self::Decimal => 1,
            Self::Int32Range => 2,
        }
    }
}

/// Chunk placement of a chunked catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// HEALPix level of the chunk partition.
    pub level: u8,
    /// Coarse cell this file holds.
    pub cell: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogHeader {
    pub title: String,
    pub format_version: u8,
    pub level: u8,
    pub catalog_type: CatalogType,
    pub coord_scale: CoordScale,
    pub chunk: Option<ChunkInfo>,
    pub first_cell: u32,
    pub last_cell: u32,
}

impl CatalogHeader {
    /// Header of an unchunked file covering the whole tessellation.
    pub fn new(
        title: impl Into<String>,
        level: u8,
        catalog_type: CatalogType,
        coord_scale: CoordScale,
    ) -> CatalogResult<Self> {
        let tessellation = Tessellation::new(level)?;
        let header = Self {
            title: title.into(),
            format_version: DEFAULT_FORMAT_VERSION,
            level,
            catalog_type,
            coord_scale,
            chunk: None,
            first_cell: 0,
            last_cell: tessellation.last_cell(),
        };
        header.validate()?;
        Ok(header)
    }

    /// Header for one chunk file. `first_cell > last_cell` marks an empty chunk.
    pub fn for_chunk(&self, chunk: ChunkInfo, first_cell: u32, last_cell: u32) -> Self {
        Self {
            chunk: Some(chunk),
            first_cell,
            last_cell,
            ..self.clone()
        }
    }

    pub fn tessellation(&self) -> CatalogResult<Tessellation> {
        Tessellation::new(self.level)
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk.is_some()
    }

    /// Number of index entries (and cells) this file covers.
    pub fn cell_span(&self) -> u32 {
        if self.last_cell < self.first_cell {
            0
        } else {
            self.last_cell - self.first_cell + 1
        }
    }

    pub fn contains_cell(&self, cell: u32) -> bool {
        cell >= self.first_cell && cell <= self.last_cell
    }

    pub fn codec(&self) -> CatalogResult<RecordCodec> {
        RecordCodec::new(self.catalog_type, self.coord_scale)
    }

    /// Check a header about to be written: the title and the cell range.
    pub fn validate(&self) -> CatalogResult<()> {
        if !self.title.is_ascii() || self.title.len() > TITLE_SIZE {
            return Err(CatalogError::Config(format!(
                "title must be ASCII and at most {} bytes",
                TITLE_SIZE
            )));
        }
        self.validate_range()
    }

    /// Level, chunk and cell range consistency. The title is free text on read.
    fn validate_range(&self) -> CatalogResult<()> {
        let tessellation = self.tessellation()?;
        match self.chunk {
            None => {
                if self.first_cell != 0 || self.last_cell != tessellation.last_cell() {
                    return Err(CatalogError::corrupt(format!(
                        "unchunked file must cover [0, {}], header says [{}, {}]",
                        tessellation.last_cell(),
                        self.first_cell,
                        self.last_cell
                    )));
                }
            }
            Some(chunk) => {
                if chunk.level > self.level {
                    return Err(CatalogError::corrupt(format!(
                        "chunk level {} deeper than cell level {}",
                        chunk.level, self.level
                    )));
                }
                if chunk.cell >= healpix::cell_count(chunk.level) {
                    return Err(CatalogError::corrupt(format!(
                        "chunk cell {} outside level {}",
                        chunk.cell, chunk.level
                    )));
                }
                let span = healpix::children(chunk.cell, chunk.level, self.level);
                let empty = self.last_cell == *span.end()
                    && self.first_cell as u64 == *span.end() as u64 + 1;
                let inside = span.contains(&self.first_cell) && span.contains(&self.last_cell);
                if !(empty || (inside && self.first_cell <= self.last_cell)) {
                    return Err(CatalogError::corrupt(format!(
                        "chunk {} range [{}, {}] outside its span [{}, {}]",
                        chunk.cell,
                        self.first_cell,
                        self.last_cell,
                        span.start(),
                        span.end()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let title = self.title.as_bytes();
        let len = title.len().min(TITLE_SIZE);
        bytes[..len].copy_from_slice(&title[..len]);
        bytes[OFF_VERSION] = self.format_version;
        bytes[OFF_LEVEL] = self.level;
        bytes[OFF_TYPE] = self.catalog_type.as_u8();
        if let Some(chunk) = self.chunk {
            bytes[OFF_CHUNKED] = 1;
            bytes[OFF_CHUNK_LEVEL] = chunk.level;
            LittleEndian::write_u32(&mut bytes[OFF_CHUNK_CELL..OFF_FIRST_CELL], chunk.cell);
            LittleEndian::write_u32(&mut bytes[OFF_FIRST_CELL..OFF_LAST_CELL], self.first_cell);
            LittleEndian::write_u32(&mut bytes[OFF_LAST_CELL..OFF_ENCODING], self.last_cell);
        }
        bytes[OFF_ENCODING] = self.coord_scale.encoding_byte();
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> CatalogResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CatalogError::corrupt(format!(
                "header truncated: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        let title = read_title(&bytes[..TITLE_SIZE]);
        let format_version = bytes[OFF_VERSION];
        let level = bytes[OFF_LEVEL];
        let catalog_type = CatalogType::from_u8(bytes[OFF_TYPE])?;
        let tessellation = Tessellation::new(level)
            .map_err(|_| CatalogError::corrupt(format!("invalid HEALPix level {}", level)))?;

        let coord_scale = match bytes[OFF_ENCODING] {
            0 => catalog_type.legacy_scale(),
            1 => CoordScale::Decimal,
            2 => CoordScale::Int32Range,
            other => return Err(CatalogError::UnsupportedEncoding(other)),
        };

        let (chunk, first_cell, last_cell) = match bytes[OFF_CHUNKED] {
            0 => (None, 0, tessellation.last_cell()),
            1 => (
                Some(ChunkInfo {
                    level: bytes[OFF_CHUNK_LEVEL],
                    cell: LittleEndian::read_u32(&bytes[OFF_CHUNK_CELL..OFF_FIRST_CELL]),
                }),
                LittleEndian::read_u32(&bytes[OFF_FIRST_CELL..OFF_LAST_CELL]),
                LittleEndian::read_u32(&bytes[OFF_LAST_CELL..OFF_ENCODING]),
            ),
            other => {
                return Err(CatalogError::corrupt(format!(
                    "invalid chunked flag {}",
                    other
                )))
            }
        };

        let header = Self {
            title,
            format_version,
            level,
            catalog_type,
            coord_scale,
            chunk,
            first_cell,
            last_cell,
        };
        header.validate_range()?;
        Ok(header)
    }
}

fn read_title(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl fmt::Display for CatalogHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title: {}", self.title)?;
        writeln!(f, "Format version: {}", self.format_version)?;
        writeln!(f, "HEALPix level: {}", self.level)?;
        writeln!(f, "Catalog type: {}", self.catalog_type)?;
        writeln!(f, "Coordinate scale: {:?}", self.coord_scale)?;
        match self.chunk {
            Some(chunk) => writeln!(f, "Chunk: cell {} at level {}", chunk.cell, chunk.level)?,
            None => writeln!(f, "Chunk: none")?,
        }
        write!(
            f,
            "Cells: [{}, {}] ({} index entries)",
            self.first_cell,
            self.last_cell,
            self.cell_span()
        )
    }
}
