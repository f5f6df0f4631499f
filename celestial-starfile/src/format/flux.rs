//! Adaptive-exponent half-precision flux vectors.
//!
//! A spectrum is scaled by `10^e` with `e = ceil(-log10(max |x|))`, which puts
//! its peak magnitude in `[1, 10)`, then each channel is stored as an IEEE
//! half. The exponent is kept as one signed byte per record.

use half::f16;

use crate::error::{CatalogError, CatalogResult};

/// Channels in a Gaia XP sampled spectrum.
pub const FLUX_CHANNELS: usize = 343;

/// A compressed spectrum as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Flux {
    pub exponent: i8,
    pub channels: Vec<f16>,
}

impl Flux {
    pub fn compress(values: &[f32]) -> CatalogResult<Self> {
        if values.len() != FLUX_CHANNELS {
            return Err(CatalogError::malformed(format!(
                "flux vector has {} channels, expected {}",
                values.len(),
                FLUX_CHANNELS
            )));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(CatalogError::malformed(format!(
                "flux channel {} is not finite",
                pos
            )));
        }
        let exponent = flux_exponent(values)?;
        let factor = 10f64.powi(exponent as i32);
        let channels = values
            .iter()
            .map(|&v| f16::from_f64(v as f64 * factor))
            .collect();
        Ok(Self { exponent, channels })
    }

    /// Undo the scaling. Precision is that of `f16` times the exponent.
    pub fn values(&self) -> Vec<f32> {
        let factor = 10f64.powi(-(self.exponent as i32));
        self.channels
            .iter()
            .map(|h| (h.to_f64() * factor) as f32)
            .collect()
    }
}

/// `ceil(-log10(max |x|))`, or 0 for an all-zero vector.
pub fn flux_exponent(values: &[f32]) -> CatalogResult<i8> {
    let peak = values.iter().fold(0f64, |m, &v| m.max((v as f64).abs()));
    if peak == 0.0 {
        return Ok(0);
    }
    let e = (-peak.log10()).ceil();
    if e < i8::MIN as f64 || e > i8::MAX as f64 {
        return Err(CatalogError::overflow("flux exponent", e, "i8"));
    }
    Ok(e as i8)
}
