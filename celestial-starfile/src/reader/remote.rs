//! Catalog reader over HTTP byte ranges.
//!
//! Opening fetches the 128-byte header. A cell lookup then costs one request
//! for the one or two index entries it needs and, if the cell has records, one
//! request for exactly those records. Servers must answer `206 Partial
//! Content`; a full-body `200` is refused rather than downloaded.

use std::ops::RangeInclusive;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tracing::debug;

use super::CatalogReader;
use crate::error::{CatalogError, CatalogResult};
use crate::format::{
    CatalogHeader, CatalogLayout, CatalogStar, CellSpan, RecordCodec, HEADER_SIZE,
    INDEX_ENTRY_SIZE,
};
use crate::index::span_between;

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("celestial-starfile/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A catalog file served over HTTP.
///
/// Only the header is held in memory. Every lookup goes back to the server,
/// so the file must not change while the reader is in use.
pub struct RemoteCatalog {
    client: Client,
    url: String,
    header: CatalogHeader,
    layout: CatalogLayout,
    codec: RecordCodec,
}

impl RemoteCatalog {
    /// Open with [`RemoteOptions::default`].
    pub fn open(url: &str) -> CatalogResult<Self> {
        Self::open_with(url, RemoteOptions::default())
    }

    /// Fetch and parse the 128-byte header at `url`.
    ///
    /// # Errors
    /// [`CatalogError::Transport`] for network failures and non-206 statuses,
    /// [`CatalogError::RangeNotHonored`] when the server returns the whole file
    /// or another range, and [`CatalogError::Corrupt`] or
    /// [`CatalogError::UnsupportedCatalogType`] for a header that cannot be read.
    pub fn open_with(url: &str, options: RemoteOptions) -> CatalogResult<Self> {
        let client = Client::builder()
            .user_agent(&options.user_agent)
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| {
                CatalogError::transport(url, format!("Failed to create HTTP client: {}", e))
            })?;
        let bytes = fetch_range(&client, url, 0, HEADER_SIZE as u64 - 1)?;
        let header = CatalogHeader::from_bytes(&bytes)?;
        let codec = header.codec()?;
        let layout = CatalogLayout::of(&header)?;
        debug!(
            url,
            first = header.first_cell,
            last = header.last_cell,
            "opened remote catalog"
        );
        Ok(Self {
            client,
            url: url.to_string(),
            header,
            layout,
            codec,
        })
    }

    /// Location this reader fetches from.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }

    fn check_cell(&self, cell: u32) -> CatalogResult<()> {
        if !self.header.contains_cell(cell) {
            return Err(CatalogError::CellOutOfRange {
                cell,
                first_cell: self.header.first_cell,
                last_cell: self.header.last_cell,
            });
        }
        Ok(())
    }

    /// Records from the start of `first` to the end of `last`, reading the
    /// entry before `first` and the entry of `last` in one request.
    fn span_of(&self, first: u32, last: u32) -> CatalogResult<CellSpan> {
        let end_entry = self.layout.entry_offset(last);
        let (from, leading) = if first == self.header.first_cell {
            (self.layout.entry_offset(first), false)
        } else {
            (self.layout.entry_offset(first - 1), true)
        };
        let bytes = self.fetch(from, end_entry + INDEX_ENTRY_SIZE as u64 - 1)?;
        let start = if leading {
            LittleEndian::read_u32(&bytes[..INDEX_ENTRY_SIZE])
        } else {
            0
        };
        let end = LittleEndian::read_u32(&bytes[bytes.len() - INDEX_ENTRY_SIZE..]);
        span_between(last, start, end)
    }

    /// Undecoded bytes of the records in `cell`.
    pub fn raw_records(&self, cell: u32) -> CatalogResult<Vec<u8>> {
        self.check_cell(cell)?;
        let span = self.span_of(cell, cell)?;
        self.span_bytes(span)
    }

    fn span_bytes(&self, span: CellSpan) -> CatalogResult<Vec<u8>> {
        if span.is_empty() {
            return Ok(Vec::new());
        }
        let range = self.layout.record_bytes(span);
        self.fetch(range.start, range.end - 1)
    }

    fn fetch(&self, start: u64, end: u64) -> CatalogResult<Vec<u8>> {
        fetch_range(&self.client, &self.url, start, end)
    }
}

/// GET `start..=end` and insist on a partial response of exactly that range.
fn fetch_range(client: &Client, url: &str, start: u64, end: u64) -> CatalogResult<Vec<u8>> {
    debug!(url, start, end, "range request");
    let response = client
        .get(url)
        .header(RANGE, format!("bytes={}-{}", start, end))
        .send()
        .map_err(|e| CatalogError::transport(url, format!("Network request failed: {}", e)))?;

    let status = response.status();
    if status == StatusCode::OK {
        return Err(CatalogError::RangeNotHonored {
            url: url.to_string(),
            start,
            end,
            status: status.as_u16(),
        });
    }
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(CatalogError::transport(
            url,
            format!("HTTP request failed with status: {}", status),
        ));
    }
    if let Some(value) = response.headers().get(CONTENT_RANGE) {
        let matches = value
            .to_str()
            .ok()
            .and_then(parse_content_range)
            .is_some_and(|range| range == (start, end));
        if !matches {
            return Err(CatalogError::RangeNotHonored {
                url: url.to_string(),
                start,
                end,
                status: status.as_u16(),
            });
        }
    }

    let body = response
        .bytes()
        .map_err(|e| CatalogError::transport(url, format!("Failed to read response: {}", e)))?;
    let expected = end - start + 1;
    if body.len() as u64 != expected {
        return Err(CatalogError::transport(
            url,
            format!("expected {} bytes, received {}", expected, body.len()),
        ));
    }
    Ok(body.to_vec())
}

/// `bytes a-b/total` or `bytes a-b/*` to `(a, b)`.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let range = value.trim().strip_prefix("bytes ")?;
    let (span, _total) = range.split_once('/')?;
    let (a, b) = span.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

impl CatalogReader for RemoteCatalog {
    fn header(&self) -> &CatalogHeader {
        &self.header
    }

    fn lookup(&self, cell: u32) -> CatalogResult<Vec<CatalogStar>> {
        let bytes = self.raw_records(cell)?;
        self.codec.decode_all(&bytes)
    }

    fn lookup_range(&self, cells: RangeInclusive<u32>) -> CatalogResult<Vec<CatalogStar>> {
        let (first, last) = (*cells.start(), *cells.end());
        self.check_cell(first)?;
        self.check_cell(last)?;
        if last < first {
            return Ok(Vec::new());
        }
        let span = self.span_of(first, last)?;
        self.codec.decode_all(&self.span_bytes(span)?)
    }
}
