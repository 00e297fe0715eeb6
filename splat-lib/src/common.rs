pub const GZIP_MAX_COMPRESSION_LVL: u32 = 9;
pub const GZIP_DEFAULT_COMPRESSION_LVL: u32 = 6;

/// Hard cap on the number of points accepted from a PLY body or an SPZ header.
pub const MAX_POINTS: usize = 10 * 1024 * 1024;

/// Fixed-point fractional bits used for new writes (~0.25 mm resolution).
pub const FRACTIONAL_BITS: u8 = 12;

pub const MAX_SH_DEGREE: u8 = 3;

/// Zeroth order spherical harmonics basis constant.
#[allow(clippy::excessive_precision)]
pub const SH_C0: f32 = 0.282_094_791_773_878_14;

// Smaller than SH_C0 so DC values out of [0, 1] survive quantization while
// the higher SH bands are expected to bring them back into range.
pub(crate) const COLOR_SCALE: f32 = 0.15;

// Storage units are centimetres, PLY units are metres.
pub(crate) const UNITS_PER_METRE: f32 = 100.0;

/// Tunables for the codec. Limits are passed explicitly rather than read from
/// process-wide state.
#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    pub compression_level: u32,
    pub max_points: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_level: GZIP_DEFAULT_COMPRESSION_LVL,
            max_points: MAX_POINTS,
        }
    }
}

#[inline]
pub(crate) fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub(crate) fn inv_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x)).ln()
}

#[inline]
pub(crate) fn dim_for_degree(deg: u8) -> usize {
    match deg {
        0 => 0,
        1 => 3,
        2 => 8,
        3 => 15,
        _ => 0,
    }
}

#[inline]
pub(crate) const fn degree_for_dim(dim: usize) -> u8 {
    if dim < 3 {
        0
    } else if dim < 8 {
        1
    } else if dim < 15 {
        2
    } else {
        3
    }
}

#[inline]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_u8_rounds_and_saturates() {
        assert_eq!(clamp_u8(-3.0), 0);
        assert_eq!(clamp_u8(12.5), 13);
        assert_eq!(clamp_u8(254.4), 254);
        assert_eq!(clamp_u8(1e9), 255);
    }

    #[test]
    fn test_sigmoid_inverse() {
        for &x in &[-4.0f32, -0.5, 0.0, 0.75, 3.0] {
            assert!((inv_sigmoid(sigmoid(x)) - x).abs() < 1e-4);
        }
        assert_eq!(sigmoid(0.0), 0.5);
    }

    #[test]
    fn test_srgb_transfer_round_trip() {
        for &c in &[0.0f32, 0.02, 0.04045, 0.2, 0.5, 0.9, 1.0] {
            let back = linear_to_srgb(srgb_to_linear(c));
            assert!((back - c).abs() < 1e-4, "{} -> {}", c, back);
        }
        assert!((srgb_to_linear(0.5) - 0.214_041).abs() < 1e-5);
    }

    #[test]
    fn test_degree_dim_mapping() {
        for deg in 0..=MAX_SH_DEGREE {
            assert_eq!(degree_for_dim(dim_for_degree(deg)), deg);
        }
        assert_eq!(dim_for_degree(7), 0);
    }
}
