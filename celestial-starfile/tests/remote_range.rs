use std::io::Write;
use std::ops::Range;

use celestial_starfile::format::{CatalogLayout, HEADER_SIZE, INDEX_ENTRY_SIZE};
use celestial_starfile::index::CellHistogram;
use celestial_starfile::writer::{write_chunk, write_two_pass, ChunkPlan};
use celestial_starfile::{
    Catalog, CatalogError, CatalogHeader, CatalogReader, CatalogType, CellStar, CoordScale,
    RemoteCatalog, StarRecord,
};
use mockito::{Mock, Server, ServerGuard};
use tempfile::NamedTempFile;

const PATH: &str = "/gaia/catalog_0.dat";

struct Fixture {
    server: ServerGuard,
    bytes: Vec<u8>,
    local: Catalog,
    _file: NamedTempFile,
}

impl Fixture {
    fn new() -> Self {
        let header =
            CatalogHeader::new("remote", 2, CatalogType::Astrometric, CoordScale::Decimal)
                .unwrap();
        let star = |ra: f64| StarRecord {
            ra,
            dec: -12.5,
            mag: Some(9.75),
            ..Default::default()
        };
        let records = vec![
            CellStar::new(0, star(1.0)),
            CellStar::new(5, star(2.0)),
            CellStar::new(5, star(3.0)),
            CellStar::new(9, star(4.0)),
        ];
        let counts = CellHistogram::from_cells(records.iter().map(|r| r.cell));
        let mut bytes = Vec::new();
        write_two_pass(&mut bytes, &header, &counts, records.into_iter().map(Ok)).unwrap();
        Self::serving(bytes)
    }

    /// Chunk 4 of a level-2 catalog split at level 1: cells 16..=19, two occupied.
    fn chunk() -> Self {
        let template =
            CatalogHeader::new("remote chunk", 2, CatalogType::Astrometric, CoordScale::Decimal)
                .unwrap();
        let plan = ChunkPlan::new(2, 1).unwrap();
        let star = |ra: f64| StarRecord {
            ra,
            dec: 3.25,
            pmra: Some(5.0),
            mag: Some(8.5),
            ..Default::default()
        };
        let records = vec![
            CellStar::new(17, star(20.0)),
            CellStar::new(18, star(21.0)),
            CellStar::new(18, star(22.0)),
        ];
        let counts = CellHistogram::from_cells(records.iter().map(|r| r.cell));
        let mut bytes = Vec::new();
        write_chunk(
            &mut bytes,
            &template,
            &plan,
            4,
            &counts,
            records.into_iter().map(Ok),
        )
        .unwrap();
        Self::serving(bytes)
    }

    fn serving(bytes: Vec<u8>) -> Self {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        Self {
            server: Server::new(),
            local: Catalog::open(file.path()).unwrap(),
            bytes,
            _file: file,
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.server.url(), PATH)
    }

    fn layout(&self) -> CatalogLayout {
        *self.local.layout()
    }

    /// Answer `range` (half-open) with a 206 slice of the file.
    fn serve(&mut self, range: Range<u64>) -> Mock {
        let (start, end) = (range.start, range.end - 1);
        let body = self.bytes[range.start as usize..range.end as usize].to_vec();
        let total = self.bytes.len();
        self.server
            .mock("GET", PATH)
            .match_header("range", format!("bytes={}-{}", start, end).as_str())
            .with_status(206)
            .with_header("content-range", &format!("bytes {}-{}/{}", start, end, total))
            .with_body(body)
            .expect(1)
            .create()
    }

    fn serve_header(&mut self) -> Mock {
        self.serve(0..HEADER_SIZE as u64)
    }

    /// Index entries `first..=last`.
    fn serve_entries(&mut self, first: u32, last: u32) -> Mock {
        let layout = self.layout();
        self.serve(layout.entry_offset(first)..layout.entry_offset(last) + INDEX_ENTRY_SIZE as u64)
    }

    fn serve_records(&mut self, first: u32, last: u32) -> Mock {
        let layout = self.layout();
        let start = self.local.cell_span(first).unwrap().start;
        let end = self.local.cell_span(last).unwrap().end;
        let range = layout.record_bytes(celestial_starfile::format::CellSpan { start, end });
        self.serve(range)
    }
}

#[test]
fn test_remote_lookup_matches_local() {
    let mut fx = Fixture::new();
    let header_mock = fx.serve_header();
    let first_entry = fx.serve_entries(0, 0);
    let first_data = fx.serve_records(0, 0);
    let busy_entries = fx.serve_entries(4, 5);
    let busy_data = fx.serve_records(5, 5);

    let remote = RemoteCatalog::open(&fx.url()).unwrap();
    assert_eq!(remote.header(), fx.local.header());

    assert_eq!(remote.lookup(0).unwrap(), fx.local.lookup(0).unwrap());
    let busy = remote.lookup(5).unwrap();
    assert_eq!(busy.len(), 2);
    assert_eq!(busy, fx.local.lookup(5).unwrap());

    header_mock.assert();
    first_entry.assert();
    first_data.assert();
    busy_entries.assert();
    busy_data.assert();
}

#[test]
fn test_chunk_file_lookup_matches_local() {
    let mut fx = Fixture::chunk();
    assert_eq!(fx.local.header().first_cell, 17);
    assert_eq!(fx.local.header().last_cell, 18);

    let _header = fx.serve_header();
    let first_entry = fx.serve_entries(17, 17);
    let first_data = fx.serve_records(17, 17);
    let pair_entries = fx.serve_entries(17, 18);
    let pair_data = fx.serve_records(18, 18);

    let remote = RemoteCatalog::open(&fx.url()).unwrap();
    assert_eq!(remote.header().chunk.map(|c| c.cell), Some(4));

    let first = remote.lookup(17).unwrap();
    assert_eq!(first, fx.local.lookup(17).unwrap());
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].ra_deg(), 20.0);

    let pair = remote.lookup(18).unwrap();
    assert_eq!(pair, fx.local.lookup(18).unwrap());
    assert_eq!(pair.len(), 2);

    assert!(matches!(
        remote.lookup(16),
        Err(CatalogError::CellOutOfRange { cell: 16, first_cell: 17, last_cell: 18 })
    ));

    first_entry.assert();
    first_data.assert();
    pair_entries.assert();
    pair_data.assert();
}

#[test]
fn test_range_lookup_coalesces_requests() {
    let mut fx = Fixture::new();
    let _header = fx.serve_header();
    let entries = fx.serve_entries(3, 9);
    let data = fx.serve_records(4, 9);

    let remote = RemoteCatalog::open(&fx.url()).unwrap();
    let stars = remote.lookup_range(4..=9).unwrap();
    assert_eq!(stars, fx.local.lookup_range(4..=9).unwrap());
    assert_eq!(stars.len(), 3);

    entries.assert();
    data.assert();
}

#[test]
fn test_empty_cell_skips_data_request() {
    let mut fx = Fixture::new();
    let _header = fx.serve_header();
    let entries = fx.serve_entries(6, 7);

    let remote = RemoteCatalog::open(&fx.url()).unwrap();
    assert!(remote.lookup(7).unwrap().is_empty());
    entries.assert();
}

#[test]
fn test_cell_outside_range_makes_no_request() {
    let mut fx = Fixture::new();
    let _header = fx.serve_header();
    let remote = RemoteCatalog::open(&fx.url()).unwrap();
    let err = remote.lookup(192).unwrap_err();
    assert!(matches!(err, CatalogError::CellOutOfRange { cell: 192, .. }));
}

#[test]
fn test_full_body_response_is_refused() {
    let mut fx = Fixture::new();
    let body = fx.bytes.clone();
    let _mock = fx
        .server
        .mock("GET", PATH)
        .with_status(200)
        .with_body(body)
        .create();

    let err = RemoteCatalog::open(&fx.url()).err().unwrap();
    assert!(
        matches!(err, CatalogError::RangeNotHonored { status: 200, .. }),
        "{}",
        err
    );
}

#[test]
fn test_wrong_content_range_is_refused() {
    let mut fx = Fixture::new();
    let body = fx.bytes[..HEADER_SIZE].to_vec();
    let _mock = fx
        .server
        .mock("GET", PATH)
        .with_status(206)
        .with_header("content-range", "bytes 128-255/4096")
        .with_body(body)
        .create();

    let err = RemoteCatalog::open(&fx.url()).err().unwrap();
    assert!(matches!(err, CatalogError::RangeNotHonored { .. }), "{}", err);
}

#[test]
fn test_missing_file_is_transport_error() {
    let mut fx = Fixture::new();
    let _mock = fx.server.mock("GET", PATH).with_status(404).create();

    let err = RemoteCatalog::open(&fx.url()).err().unwrap();
    assert!(matches!(err, CatalogError::Transport { .. }), "{}", err);
    assert!(err.is_retryable());
}

#[test]
fn test_short_body_is_transport_error() {
    let mut fx = Fixture::new();
    let body = fx.bytes[..64].to_vec();
    let _mock = fx
        .server
        .mock("GET", PATH)
        .with_status(206)
        .with_body(body)
        .create();

    let err = RemoteCatalog::open(&fx.url()).err().unwrap();
    assert!(matches!(err, CatalogError::Transport { .. }), "{}", err);
}
