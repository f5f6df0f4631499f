//! Fixed-size star records.
//!
//! Two layouts, both little-endian and packed:
//!
//! | Type | Layout | Size |
//! |------|--------|------|
//! | Astrometric | `ra:i32 dec:i32 pmra:i16 pmdec:i16 teff:u16 mag:i16` | 16 |
//! | Photometric | `ra:i32 dec:i32 pmra:i16 pmdec:i16 mag:i16 exp:i8 flux:343×f16` | 701 |
//!
//! Absent proper motion, temperature or magnitude are stored as 0 and read
//! back as 0. A stored zero cannot be told apart from a missing value.

use byteorder::{ByteOrder, LittleEndian};
use half::f16;

use super::flux::{Flux, FLUX_CHANNELS};
use super::header::{CatalogType, CoordScale};
use crate::error::{CatalogError, CatalogResult};

pub const ASTROMETRIC_RECORD_SIZE: usize = 16;
pub const PHOTOMETRIC_RECORD_SIZE: usize = FLUX_OFFSET + FLUX_CHANNELS * 2;

/// Start of the f16 channels in a photometric record.
const FLUX_OFFSET: usize = 15;

const MAG_SCALE: f64 = 1000.0;

/// A star as supplied to the writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarRecord {
    /// Right ascension, degrees.
    pub ra: f64,
    /// Declination, degrees.
    pub dec: f64,
    /// Proper motion in RA, mas/yr.
    pub pmra: Option<f64>,
    /// Proper motion in Dec, mas/yr.
    pub pmdec: Option<f64>,
    /// Effective temperature, K. Only stored by astrometric catalogs.
    pub teff: Option<f64>,
    pub mag: Option<f64>,
    /// XP sampled flux, exactly 343 channels. Required by photometric catalogs.
    pub flux: Option<Vec<f32>>,
}

/// A star as stored in the catalog: the raw fixed-point fields plus the
/// scale needed to interpret RA/Dec.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogStar {
    pub ra_raw: i32,
    pub dec_raw: i32,
    pub pmra_raw: i16,
    pub pmdec_raw: i16,
    /// Always 0 in photometric catalogs.
    pub teff_raw: u16,
    pub mag_raw: i16,
    pub flux: Option<Flux>,
    pub scale: CoordScale,
}

impl CatalogStar {
    pub fn ra_deg(&self) -> f64 {
        self.ra_raw as f64 / self.scale.ra_factor()
    }

    pub fn dec_deg(&self) -> f64 {
        self.dec_raw as f64 / self.scale.dec_factor()
    }

    pub fn pmra(&self) -> f64 {
        self.pmra_raw as f64
    }

    pub fn pmdec(&self) -> f64 {
        self.pmdec_raw as f64
    }

    pub fn teff(&self) -> f64 {
        self.teff_raw as f64
    }

    pub fn mag(&self) -> f64 {
        self.mag_raw as f64 / MAG_SCALE
    }

    pub fn flux_values(&self) -> Option<Vec<f32>> {
        self.flux.as_ref().map(Flux::values)
    }
}

/// Encoder/decoder for one catalog type and coordinate scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    catalog_type: CatalogType,
    scale: CoordScale,
}

impl RecordCodec {
    /// Codec for one catalog type and coordinate scale.
    ///
    /// # Errors
    /// [`CatalogError::UnsupportedCatalogType`] for continuous photometric
    /// catalogs, whose record layout is not defined.
    pub fn new(catalog_type: CatalogType, scale: CoordScale) -> CatalogResult<Self> {
        match catalog_type {
            CatalogType::Astrometric | CatalogType::Photometric => Ok(Self {
                catalog_type,
                scale,
            }),
            CatalogType::PhotometricContinuous => {
                Err(CatalogError::UnsupportedCatalogType(catalog_type.as_u8()))
            }
        }
    }

    pub fn catalog_type(&self) -> CatalogType {
        self.catalog_type
    }

    pub fn scale(&self) -> CoordScale {
        self.scale
    }

    pub fn record_size(&self) -> usize {
        match self.catalog_type {
            CatalogType::Photometric => PHOTOMETRIC_RECORD_SIZE,
            _ => ASTROMETRIC_RECORD_SIZE,
        }
    }

    /// Encode one star into a fresh buffer of [`record_size`](Self::record_size) bytes.
    ///
    /// # Errors
    /// [`CatalogError::MalformedInput`] for non-finite values or a photometric
    /// star without exactly 343 flux channels; [`CatalogError::EncodingOverflow`]
    /// when a scaled value does not fit its field.
    pub fn encode(&self, star: &StarRecord) -> CatalogResult<Vec<u8>> {
        let mut buf = vec![0u8; self.record_size()];
        self.encode_into(star, &mut buf)?;
        Ok(buf)
    }

    /// Encode into `buf`, which must be exactly [`record_size`](Self::record_size) long.
    /// Nothing is written to `buf` if the record is rejected.
    pub fn encode_into(&self, star: &StarRecord, buf: &mut [u8]) -> CatalogResult<()> {
        if buf.len() != self.record_size() {
            return Err(CatalogError::malformed(format!(
                "record buffer is {} bytes, expected {}",
                buf.len(),
                self.record_size()
            )));
        }
        let ra = to_i32("ra", star.ra, self.scale.ra_factor())?;
        let dec = to_i32("dec", star.dec, self.scale.dec_factor())?;
        let pmra = to_i16("pmra", star.pmra.unwrap_or(0.0), 1.0)?;
        let pmdec = to_i16("pmdec", star.pmdec.unwrap_or(0.0), 1.0)?;
        let mag = to_i16("mag", star.mag.unwrap_or(0.0), MAG_SCALE)?;

        match self.catalog_type {
            CatalogType::Photometric => {
                let values = star.flux.as_deref().ok_or_else(|| {
                    CatalogError::malformed("photometric record without flux")
                })?;
                let flux = Flux::compress(values)?;
                LittleEndian::write_i32(&mut buf[0..4], ra);
                LittleEndian::write_i32(&mut buf[4..8], dec);
                LittleEndian::write_i16(&mut buf[8..10], pmra);
                LittleEndian::write_i16(&mut buf[10..12], pmdec);
                LittleEndian::write_i16(&mut buf[12..14], mag);
                buf[14] = flux.exponent as u8;
                for (slot, value) in buf[FLUX_OFFSET..].chunks_exact_mut(2).zip(&flux.channels) {
                    LittleEndian::write_u16(slot, value.to_bits());
                }
            }
            _ => {
                let teff = to_u16("teff", star.teff.unwrap_or(0.0))?;
                LittleEndian::write_i32(&mut buf[0..4], ra);
                LittleEndian::write_i32(&mut buf[4..8], dec);
                LittleEndian::write_i16(&mut buf[8..10], pmra);
                LittleEndian::write_i16(&mut buf[10..12], pmdec);
                LittleEndian::write_u16(&mut buf[12..14], teff);
                LittleEndian::write_i16(&mut buf[14..16], mag);
            }
        }
        Ok(())
    }

    /// Decode one record. Integer fields come back exactly as stored.
    ///
    /// # Errors
    /// [`CatalogError::Corrupt`] if `buf` is not exactly one record long.
    pub fn decode(&self, buf: &[u8]) -> CatalogResult<CatalogStar> {
        if buf.len() != self.record_size() {
            return Err(CatalogError::corrupt(format!(
                "record slice is {} bytes, expected {}",
                buf.len(),
                self.record_size()
            )));
        }
        let ra_raw = LittleEndian::read_i32(&buf[0..4]);
        let dec_raw = LittleEndian::read_i32(&buf[4..8]);
        let pmra_raw = LittleEndian::read_i16(&buf[8..10]);
        let pmdec_raw = LittleEndian::read_i16(&buf[10..12]);

        let (teff_raw, mag_raw, flux) = match self.catalog_type {
            CatalogType::Photometric => {
                let channels: Vec<f16> = buf[FLUX_OFFSET..]
                    .chunks_exact(2)
                    .map(|c| f16::from_bits(LittleEndian::read_u16(c)))
                    .collect();
                if channels.len() != FLUX_CHANNELS {
                    return Err(CatalogError::corrupt(format!(
                        "photometric record holds {} flux channels, expected {}",
                        channels.len(),
                        FLUX_CHANNELS
                    )));
                }
                let flux = Flux {
                    exponent: buf[14] as i8,
                    channels,
                };
                (0, LittleEndian::read_i16(&buf[12..14]), Some(flux))
            }
            _ => (
                LittleEndian::read_u16(&buf[12..14]),
                LittleEndian::read_i16(&buf[14..16]),
                None,
            ),
        };

        Ok(CatalogStar {
            ra_raw,
            dec_raw,
            pmra_raw,
            pmdec_raw,
            teff_raw,
            mag_raw,
            flux,
            scale: self.scale,
        })
    }

    /// Decode a run of back-to-back records.
    pub fn decode_all(&self, bytes: &[u8]) -> CatalogResult<Vec<CatalogStar>> {
        let size = self.record_size();
        if bytes.len() % size != 0 {
            return Err(CatalogError::corrupt(format!(
                "{} bytes is not a whole number of {}-byte records",
                bytes.len(),
                size
            )));
        }
        bytes.chunks_exact(size).map(|r| self.decode(r)).collect()
    }
}

/// Scale and truncate toward zero, rejecting values outside the target type.
fn scaled(field: &'static str, value: f64, factor: f64) -> CatalogResult<f64> {
    if !value.is_finite() {
        return Err(CatalogError::malformed(format!(
            "{} is not finite: {}",
            field, value
        )));
    }
    Ok((value * factor).trunc())
}

fn to_i32(field: &'static str, value: f64, factor: f64) -> CatalogResult<i32> {
    let v = scaled(field, value, factor)?;
    if v < i32::MIN as f64 || v > i32::MAX as f64 {
        return Err(CatalogError::overflow(field, value, "i32"));
    }
    Ok(v as i32)
}

fn to_i16(field: &'static str, value: f64, factor: f64) -> CatalogResult<i16> {
    let v = scaled(field, value, factor)?;
    if v < i16::MIN as f64 || v > i16::MAX as f64 {
        return Err(CatalogError::overflow(field, value, "i16"));
    }
    Ok(v as i16)
}

fn to_u16(field: &'static str, value: f64) -> CatalogResult<u16> {
    let v = scaled(field, value, 1.0)?;
    if v < 0.0 || v > u16::MAX as f64 {
        return Err(CatalogError::overflow(field, value, "u16"));
    }
    Ok(v as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn astrometric() -> RecordCodec {
        RecordCodec::new(CatalogType::Astrometric, CoordScale::Decimal).unwrap()
    }

    fn photometric() -> RecordCodec {
        RecordCodec::new(CatalogType::Photometric, CoordScale::Int32Range).unwrap()
    }

    fn star(ra: f64, dec: f64) -> StarRecord {
        StarRecord {
            ra,
            dec,
            pmra: Some(11.7),
            pmdec: Some(-4.2),
            teff: Some(5772.4),
            mag: Some(17.641),
            flux: None,
        }
    }

    fn flux() -> Vec<f32> {
        (0..FLUX_CHANNELS)
            .map(|i| 3.5e-17 * (1.0 + i as f32 / 343.0))
            .collect()
    }

    #[test]
    fn record_sizes() {
        assert_eq!(astrometric().record_size(), 16);
        assert_eq!(photometric().record_size(), 701);
    }

    #[test]
    fn continuous_type_has_no_codec() {
        assert!(matches!(
            RecordCodec::new(CatalogType::PhotometricContinuous, CoordScale::Int32Range),
            Err(CatalogError::UnsupportedCatalogType(3))
        ));
    }

    #[test]
    fn astrometric_layout() {
        let bytes = astrometric().encode(&star(123.456789, -45.6789)).unwrap();
        assert_eq!(LittleEndian::read_i32(&bytes[0..4]), 123_456_789);
        assert_eq!(LittleEndian::read_i32(&bytes[4..8]), -4_567_890);
        assert_eq!(LittleEndian::read_i16(&bytes[8..10]), 11);
        assert_eq!(LittleEndian::read_i16(&bytes[10..12]), -4);
        assert_eq!(LittleEndian::read_u16(&bytes[12..14]), 5772);
        assert_eq!(LittleEndian::read_i16(&bytes[14..16]), 17_641);
    }

    #[test]
    fn astrometric_round_trip_is_exact_on_integers() {
        let codec = astrometric();
        let bytes = codec.encode(&star(10.5, 20.25)).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.ra_raw, 10_500_000);
        assert_eq!(decoded.dec_raw, 2_025_000);
        assert_eq!(decoded.ra_deg(), 10.5);
        assert_eq!(decoded.dec_deg(), 20.25);
        assert_eq!(decoded.teff(), 5772.0);
        assert!(decoded.flux.is_none());
        assert_eq!(codec.encode(&star(10.5, 20.25)).unwrap(), bytes);
    }

    #[test]
    fn photometric_round_trip() {
        let codec = photometric();
        let mut input = star(45.0, 0.0);
        input.flux = Some(flux());
        let bytes = codec.encode(&input).unwrap();
        assert_eq!(bytes.len(), 701);
        assert_eq!(bytes[14] as i8, 17);

        let decoded = codec.decode(&bytes).unwrap();
        assert!((decoded.ra_deg() - 45.0).abs() < 1e-6);
        assert_eq!(decoded.dec_raw, 0);
        assert_eq!(decoded.pmra(), 11.0);
        assert_eq!(decoded.pmdec(), -4.0);
        assert_eq!(decoded.teff_raw, 0);
        assert!((decoded.mag() - 17.641).abs() <= 0.001);
        let values = decoded.flux_values().unwrap();
        assert_eq!(values.len(), FLUX_CHANNELS);
        for (a, b) in flux().iter().zip(&values) {
            assert!((a - b).abs() <= 7.0e-17 * 1.0e-3);
        }
        assert!((values[342] - flux()[342]).abs() <= 7.0e-17 * 1.0e-3);
    }

    #[test]
    fn decodes_hand_packed_photometric_record() {
        // =iihhhB343e
        let mut bytes = Vec::with_capacity(701);
        bytes.extend_from_slice(&1_073_741_823i32.to_le_bytes());
        bytes.extend_from_slice(&(-5_965_232i32).to_le_bytes());
        bytes.extend_from_slice(&7i16.to_le_bytes());
        bytes.extend_from_slice(&(-3i16).to_le_bytes());
        bytes.extend_from_slice(&12_345i16.to_le_bytes());
        bytes.push(16u8);
        for i in 0..FLUX_CHANNELS {
            let value = f16::from_f32(1.0 + i as f32 / 100.0);
            bytes.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        assert_eq!(bytes.len(), 701);

        let decoded = photometric().decode(&bytes).unwrap();
        assert!((decoded.ra_deg() - 180.0).abs() < 1e-6);
        assert!((decoded.dec_deg() + 1.0).abs() < 1e-6);
        assert_eq!(decoded.pmra(), 7.0);
        assert_eq!(decoded.pmdec(), -3.0);
        assert_eq!(decoded.mag_raw, 12_345);
        let flux = decoded.flux.unwrap();
        assert_eq!(flux.exponent, 16);
        assert_eq!(flux.channels.len(), FLUX_CHANNELS);
        assert_eq!(flux.channels[342], f16::from_f32(4.42));
    }

    #[test]
    fn encoded_flux_fills_record() {
        let mut input = star(10.0, 10.0);
        input.flux = Some(flux());
        let bytes = photometric().encode(&input).unwrap();
        let compressed = Flux::compress(&flux()).unwrap();
        assert_eq!(
            LittleEndian::read_u16(&bytes[699..701]),
            compressed.channels[342].to_bits()
        );
    }

    #[test]
    fn absent_fields_become_zero() {
        let codec = astrometric();
        let input = StarRecord {
            ra: 1.0,
            dec: 1.0,
            ..Default::default()
        };
        let decoded = codec.decode(&codec.encode(&input).unwrap()).unwrap();
        assert_eq!(decoded.pmra_raw, 0);
        assert_eq!(decoded.pmdec_raw, 0);
        assert_eq!(decoded.teff_raw, 0);
        assert_eq!(decoded.mag_raw, 0);
    }

    #[test]
    fn int32_range_covers_full_circle() {
        let codec = photometric();
        let mut input = star(360.0, -90.0);
        input.flux = Some(flux());
        let decoded = codec.decode(&codec.encode(&input).unwrap()).unwrap();
        assert_eq!(decoded.ra_raw, i32::MAX);
        assert!((decoded.dec_deg() + 90.0).abs() < 1e-6);
    }

    #[test]
    fn decimal_ra_overflow_is_reported() {
        let err = astrometric().encode(&star(2200.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::EncodingOverflow { field: "ra", .. }
        ));
    }

    #[test]
    fn int16_overflow_is_reported() {
        let mut input = star(1.0, 1.0);
        input.pmra = Some(40_000.0);
        assert!(matches!(
            astrometric().encode(&input),
            Err(CatalogError::EncodingOverflow { field: "pmra", .. })
        ));

        let mut input = star(1.0, 1.0);
        input.mag = Some(33.0);
        assert!(matches!(
            astrometric().encode(&input),
            Err(CatalogError::EncodingOverflow { field: "mag", .. })
        ));
    }

    #[test]
    fn photometric_requires_flux() {
        let err = photometric().encode(&star(1.0, 1.0)).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedInput { .. }));
    }

    #[test]
    fn nan_position_is_malformed() {
        assert!(matches!(
            astrometric().encode(&star(f64::NAN, 0.0)),
            Err(CatalogError::MalformedInput { .. })
        ));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(
            astrometric().decode(&[0u8; 15]),
            Err(CatalogError::Corrupt { .. })
        ));
        assert!(astrometric().decode_all(&[0u8; 33]).is_err());
        assert_eq!(astrometric().decode_all(&[0u8; 32]).unwrap().len(), 2);
    }
}
