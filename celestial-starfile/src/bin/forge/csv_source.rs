//! CSV star list reader
//!
//! One star per row after a header row (`#` comment lines are skipped).
//! Required columns: `ra`, `dec`. Optional: `cell`, `pmra`, `pmdec`, `teff`,
//! `mag`, `flux`. Empty or `null` fields are absent. `flux` holds a bracketed
//! list such as `"[1.2e-17, 1.3e-17, ...]"`, as in Gaia XP sampled exports.
//! Rows without a `cell` column are placed with `ang2pix_nest`.

use anyhow::Context;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use celestial_starfile::format::StarRecord;
use celestial_starfile::healpix::Tessellation;
use celestial_starfile::{CatalogError, CatalogResult, CellStar};

struct ColumnIndices {
    ra: usize,
    dec: usize,
    cell: Option<usize>,
    pmra: Option<usize>,
    pmdec: Option<usize>,
    teff: Option<usize>,
    mag: Option<usize>,
    flux: Option<usize>,
}

pub struct StarCsvParser<R: BufRead> {
    reader: R,
    indices: ColumnIndices,
    tessellation: Tessellation,
    line_buf: String,
    line_no: u64,
}

/// Open a plain or gzipped CSV file.
pub fn open_input(path: &Path) -> anyhow::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open input: {:?}", path))?;
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Parse every row of `path`.
pub fn read_stars(
    path: &Path,
    tessellation: Tessellation,
) -> anyhow::Result<StarCsvParser<Box<dyn BufRead + Send>>> {
    StarCsvParser::new(open_input(path)?, tessellation)
        .with_context(|| format!("Failed to read CSV header of {:?}", path))
}

impl<R: BufRead> StarCsvParser<R> {
    pub fn new(mut reader: R, tessellation: Tessellation) -> anyhow::Result<Self> {
        let (indices, line_no) = Self::parse_header(&mut reader)?;
        Ok(Self {
            reader,
            indices,
            tessellation,
            line_buf: String::with_capacity(4096),
            line_no,
        })
    }

    fn parse_header(reader: &mut R) -> anyhow::Result<(ColumnIndices, u64)> {
        let mut line = String::new();
        let mut line_no = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                anyhow::bail!("EOF before finding header");
            }
            line_no += 1;
            if !line.starts_with('#') {
                break;
            }
        }
        Ok((Self::build_column_indices(&line)?, line_no))
    }

    fn build_column_indices(header_line: &str) -> anyhow::Result<ColumnIndices> {
        let mut col_map: HashMap<&str, usize> = HashMap::new();
        for (idx, col) in header_line.trim().split(',').enumerate() {
            col_map.insert(col.trim(), idx);
        }
        let require = |name: &str| {
            col_map
                .get(name)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("Missing column: {}", name))
        };
        Ok(ColumnIndices {
            ra: require("ra")?,
            dec: require("dec")?,
            cell: col_map.get("cell").copied(),
            pmra: col_map.get("pmra").copied(),
            pmdec: col_map.get("pmdec").copied(),
            teff: col_map.get("teff").copied(),
            mag: col_map.get("mag").copied(),
            flux: col_map.get("flux").copied(),
        })
    }

    fn parse_row(&self) -> CatalogResult<Option<CellStar>> {
        let line = self.line_buf.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let fields = split_fields(line);
        let field = |idx: Option<usize>| idx.and_then(|i| fields.get(i).copied()).and_then(present);

        let ra = self.required(field(Some(self.indices.ra)), "ra")?;
        let dec = self.required(field(Some(self.indices.dec)), "dec")?;
        let star = StarRecord {
            ra,
            dec,
            pmra: self.optional(field(self.indices.pmra), "pmra")?,
            pmdec: self.optional(field(self.indices.pmdec), "pmdec")?,
            teff: self.optional(field(self.indices.teff), "teff")?,
            mag: self.optional(field(self.indices.mag), "mag")?,
            flux: field(self.indices.flux)
                .map(|v| parse_flux(v).map_err(|e| self.row_error(&e)))
                .transpose()?,
        };
        let cell = match field(self.indices.cell) {
            Some(v) => {
                let cell: u32 = v
                    .parse()
                    .map_err(|_| self.row_error(&format!("invalid cell {:?}", v)))?;
                if !self.tessellation.contains(cell) {
                    return Err(self.row_error(&format!(
                        "cell {} outside level {}",
                        cell,
                        self.tessellation.level()
                    )));
                }
                cell
            }
            None => self.tessellation.cell_of(ra, dec),
        };
        Ok(Some(CellStar::new(cell, star)))
    }

    fn required(&self, value: Option<&str>, name: &str) -> CatalogResult<f64> {
        self.optional(value, name)?
            .ok_or_else(|| self.row_error(&format!("missing {}", name)))
    }

    fn optional(&self, value: Option<&str>, name: &str) -> CatalogResult<Option<f64>> {
        value
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| self.row_error(&format!("invalid {} {:?}", name, v)))
            })
            .transpose()
    }

    fn row_error(&self, message: &str) -> CatalogError {
        CatalogError::malformed(format!("line {}: {}", self.line_no, message))
    }
}

impl<R: BufRead> Iterator for StarCsvParser<R> {
    type Item = CatalogResult<CellStar>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_buf.clear();
            match self.reader.read_line(&mut self.line_buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_no += 1;
            if self.line_buf.starts_with('#') {
                continue;
            }
            match self.parse_row() {
                Ok(Some(star)) => return Some(Ok(star)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn present(field: &str) -> Option<&str> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(field)
    }
}

/// Split on commas outside quotes and brackets.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '[' if !quoted => depth += 1,
            ']' if !quoted => depth -= 1,
            ',' if !quoted && depth == 0 => {
                fields.push(unquote(&line[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(unquote(&line[start..]));
    fields
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

fn parse_flux(field: &str) -> Result<Vec<f32>, String> {
    let inner = field
        .trim()
        .strip_prefix('[')
        .and_then(|f| f.strip_suffix(']'))
        .ok_or_else(|| format!("flux is not a bracketed list: {:.20}", field))?;
    inner
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|_| format!("invalid flux value {:?}", v.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> Vec<CatalogResult<CellStar>> {
        let tess = Tessellation::new(8).unwrap();
        StarCsvParser::new(Cursor::new(text.to_string()), tess)
            .unwrap()
            .collect()
    }

    #[test]
    fn test_split_respects_brackets_and_quotes() {
        assert_eq!(
            split_fields(r#"1,2,"[3, 4]",5"#),
            vec!["1", "2", "[3, 4]", "5"]
        );
        assert_eq!(split_fields("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_parses_optional_columns() {
        let rows = parse("# comment\nra,dec,cell,mag,pmra\n45.0,0.5,5000,17.641,\n");
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.cell, 5000);
        assert_eq!(row.star.mag, Some(17.641));
        assert_eq!(row.star.pmra, None);
        assert_eq!(row.star.teff, None);
    }

    #[test]
    fn test_missing_cell_is_computed() {
        let rows = parse("ra,dec\n0.0,0.0\n");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.cell, Tessellation::new(8).unwrap().cell_of(0.0, 0.0));
    }

    #[test]
    fn test_flux_list() {
        let flux: Vec<String> = (0..343).map(|i| format!("{}e-18", i)).collect();
        let text = format!("ra,dec,flux\n1.0,2.0,\"[{}]\"\n", flux.join(", "));
        let rows = parse(&text);
        let values = rows[0].as_ref().unwrap().star.flux.clone().unwrap();
        assert_eq!(values.len(), 343);
        assert_eq!(values[2], 2e-18);
    }

    #[test]
    fn test_bad_rows_report_line() {
        let rows = parse("ra,dec\n1.0,2.0\nabc,2.0\n,3.0\n");
        assert!(rows[0].is_ok());
        let err = rows[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("line 3"), "{}", err);
        assert!(rows[2].as_ref().unwrap_err().to_string().contains("missing ra"));
    }

    #[test]
    fn test_missing_required_column() {
        let tess = Tessellation::new(8).unwrap();
        assert!(StarCsvParser::new(Cursor::new("ra,mag\n".to_string()), tess).is_err());
    }

    #[test]
    fn test_cell_outside_level() {
        let rows = parse("ra,dec,cell\n1,1,786432\n");
        assert!(rows[0].is_err());
    }
}
