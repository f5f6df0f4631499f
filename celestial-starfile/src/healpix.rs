//! Nested HEALPix tessellation used as the catalog's spatial key.
//!
//! Cells are nested pixel indices at a fixed level (nside = 2^level,
//! `12 * 4^level` cells). Because the scheme is nested, every cell at a coarse
//! level owns one contiguous run of cells at a finer level, which is what
//! makes chunking by coarse cell produce contiguous index ranges.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::ops::RangeInclusive;

use crate::error::{CatalogError, CatalogResult};

/// Deepest level whose cell ids still fit in a `u32` (`12 * 4^14 < 2^32`).
pub const MAX_LEVEL: u8 = 14;

/// A fixed universe of cells at one HEALPix level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tessellation {
    level: u8,
}

impl Tessellation {
    pub fn new(level: u8) -> CatalogResult<Self> {
        if level > MAX_LEVEL {
            return Err(CatalogError::Config(format!(
                "HEALPix level {} exceeds maximum {}",
                level, MAX_LEVEL
            )));
        }
        Ok(Self { level })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn nside(&self) -> u32 {
        1u32 << self.level
    }

    /// Total number of cells, `12 * nside^2`.
    pub fn cell_count(&self) -> u32 {
        cell_count(self.level)
    }

    pub fn last_cell(&self) -> u32 {
        self.cell_count() - 1
    }

    pub fn contains(&self, cell: u32) -> bool {
        cell < self.cell_count()
    }

    /// Cell containing the given position (degrees).
    pub fn cell_of(&self, ra_deg: f64, dec_deg: f64) -> u32 {
        ang2pix_nest(self.level, ra_deg, dec_deg)
    }
}

pub fn cell_count(level: u8) -> u32 {
    12u32 << (2 * level as u32)
}

/// Coarse cell owning `cell`. Requires `coarse_level <= level`.
pub fn parent_cell(cell: u32, level: u8, coarse_level: u8) -> u32 {
    debug_assert!(coarse_level <= level);
    cell >> (2 * (level - coarse_level) as u32)
}

/// Fine cells covered by `coarse` at `level`.
pub fn children(coarse: u32, coarse_level: u8, level: u8) -> RangeInclusive<u32> {
    debug_assert!(coarse_level <= level);
    let shift = 2 * (level - coarse_level) as u32;
    let first = coarse << shift;
    let last = first + ((1u32 << shift) - 1);
    first..=last
}

/// Convert (RA, Dec) in degrees to a nested pixel index at `level`.
///
/// Gorski et al. (2005), nested scheme.
pub fn ang2pix_nest(level: u8, ra_deg: f64, dec_deg: f64) -> u32 {
    let phi = ra_deg.to_radians().rem_euclid(TAU);
    let z = libm::sin(dec_deg.to_radians().clamp(-FRAC_PI_2, FRAC_PI_2));
    let nside = 1u64 << level;
    let (face, ix, iy) = face_and_position(phi, z, nside);
    let ipix = xy2pix_nest(ix, iy, level);
    (face as u64 * nside * nside + ipix) as u32
}

fn face_and_position(phi: f64, z: f64, nside: u64) -> (u32, u64, u64) {
    let z_abs = libm::fabs(z);
    let tt = phi * 2.0 / PI;
    if z_abs <= 2.0 / 3.0 {
        equatorial_face(tt, z, nside)
    } else {
        polar_face(tt, z, z_abs, nside)
    }
}

fn equatorial_face(tt: f64, z: f64, nside: u64) -> (u32, u64, u64) {
    let temp1 = nside as f64 * (0.5 + tt);
    let temp2 = nside as f64 * z * 0.75;
    let jp = (temp1 - temp2) as u64;
    let jm = (temp1 + temp2) as u64;
    let ifp = jp / nside;
    let ifm = jm / nside;
    let face = if ifp == ifm {
        (ifp | 4) as u32
    } else if ifp < ifm {
        ifp as u32
    } else {
        (ifm + 8) as u32
    };
    let ix = jm % nside;
    let iy = nside - (jp % nside) - 1;
    (face, ix, iy)
}

fn polar_face(tt: f64, z: f64, z_abs: f64, nside: u64) -> (u32, u64, u64) {
    let ntt = (tt as u32).min(3);
    let tp = tt - ntt as f64;
    let tmp = nside as f64 * libm::sqrt(3.0 * (1.0 - z_abs));
    let jp = ((tp * tmp) as u64).min(nside - 1);
    let jm = (((1.0 - tp) * tmp) as u64).min(nside - 1);
    if z >= 0.0 {
        (ntt, nside - jm - 1, nside - jp - 1)
    } else {
        (ntt + 8, jp, jm)
    }
}

/// Interleave (ix, iy) bits into a Z-order index within one base face.
fn xy2pix_nest(ix: u64, iy: u64, level: u8) -> u64 {
    let mut result = 0u64;
    for i in 0..level as u64 {
        result |= (((ix >> i) & 1) << (2 * i)) | (((iy >> i) & 1) << (2 * i + 1));
    }
    result
}
