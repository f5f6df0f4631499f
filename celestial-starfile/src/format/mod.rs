//! On-disk format: header, fixed-size records, compressed flux and the
//! offsets that tie them together.

pub mod flux;
pub mod header;
pub mod layout;
pub mod record;

pub use flux::{Flux, FLUX_CHANNELS};
pub use header::{
    CatalogHeader, CatalogType, ChunkInfo, CoordScale, DEFAULT_FORMAT_VERSION, HEADER_SIZE,
};
pub use layout::{CatalogLayout, CellSpan, INDEX_ENTRY_SIZE};
pub use record::{
    CatalogStar, RecordCodec, StarRecord, ASTROMETRIC_RECORD_SIZE, PHOTOMETRIC_RECORD_SIZE,
};
