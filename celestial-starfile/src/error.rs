//! Error type shared by the codec, writers and readers.
//!
//! | Variant | Raised by | Recoverable? |
//! |---------|-----------|--------------|
//! | [`MalformedInput`](CatalogError::MalformedInput) | codec, index builder, writers | No, fix the source |
//! | [`EncodingOverflow`](CatalogError::EncodingOverflow) | codec, index builder | No |
//! | [`Corrupt`](CatalogError::Corrupt) | readers | No, discard the file |
//! | [`CellOutOfRange`](CatalogError::CellOutOfRange) | readers | Caller error |
//! | [`Transport`](CatalogError::Transport) | remote reader | Retry at a higher layer |
//! | [`RangeNotHonored`](CatalogError::RangeNotHonored) | remote reader | Use another server |

use std::io;
use thiserror::Error;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    #[error("Encoding overflow in {field}: {value} does not fit {target}")]
    EncodingOverflow {
        field: &'static str,
        value: f64,
        target: &'static str,
    },

    #[error("Corrupt catalog: {message}")]
    Corrupt { message: String },

    #[error("Cell {cell} outside catalog range [{first_cell}, {last_cell}]")]
    CellOutOfRange {
        cell: u32,
        first_cell: u32,
        last_cell: u32,
    },

    #[error("Unsupported catalog type: {0}")]
    UnsupportedCatalogType(u8),

    #[error("Unsupported coordinate encoding: {0}")]
    UnsupportedEncoding(u8),

    #[error("Transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Server ignored byte range {start}-{end} for {url} (status {status})")]
    RangeNotHonored {
        url: String,
        start: u64,
        end: u64,
        status: u16,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CatalogError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    pub fn overflow(field: &'static str, value: f64, target: &'static str) -> Self {
        Self::EncodingOverflow {
            field,
            value,
            target,
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// True for failures a caller may reasonably retry (network trouble).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_display() {
        let err = CatalogError::overflow("ra", 1e12, "i32");
        assert_eq!(
            err.to_string(),
            "Encoding overflow in ra: 1000000000000 does not fit i32"
        );
    }

    #[test]
    fn out_of_range_display() {
        let err = CatalogError::CellOutOfRange {
            cell: 9,
            first_cell: 10,
            last_cell: 20,
        };
        assert_eq!(err.to_string(), "Cell 9 outside catalog range [10, 20]");
    }

    #[test]
    fn io_error_converts() {
        let err: CatalogError = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(matches!(err, CatalogError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: short");
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(CatalogError::transport("http://x", "reset").is_retryable());
        assert!(!CatalogError::corrupt("short read").is_retryable());
        assert!(!CatalogError::malformed("bad").is_retryable());
    }
}
