//! IEEE 754 binary16 conversions used by the legacy (version 1) SPZ position
//! encoding.

/// Raw bits of an IEEE 754 half precision float.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HalfFloat(pub u16);

const SIGN_MASK: u16 = 0x8000;
const EXP_MASK: u16 = 0x7C00;
const MANTISSA_MASK: u16 = 0x03FF;

impl HalfFloat {
    pub const INFINITY: HalfFloat = HalfFloat(EXP_MASK);
    pub const NEG_INFINITY: HalfFloat = HalfFloat(SIGN_MASK | EXP_MASK);

    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        HalfFloat(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        HalfFloat(u16::from_le_bytes(bytes))
    }

    /// Widens to f32. Exact for every half value.
    pub fn to_f32(self) -> f32 {
        let sign = ((self.0 & SIGN_MASK) as u32) << 16;
        let exponent = ((self.0 & EXP_MASK) >> 10) as u32;
        let mantissa = (self.0 & MANTISSA_MASK) as u32;

        match exponent {
            0 => {
                // Zero or subnormal: mantissa * 2^-24
                let magnitude = mantissa as f32 * f32::from_bits(0x3380_0000);
                f32::from_bits(sign | magnitude.to_bits())
            }
            31 => {
                if mantissa == 0 {
                    f32::from_bits(sign | 0x7F80_0000)
                } else {
                    f32::NAN
                }
            }
            _ => f32::from_bits(sign | ((exponent + 127 - 15) << 23) | (mantissa << 13)),
        }
    }

    /// Narrows from f32, truncating extra mantissa bits. Magnitudes above the
    /// half range become infinity, values below it flush toward zero.
    pub fn from_f32(value: f32) -> Self {
        let bits = value.to_bits();
        let sign = ((bits >> 16) & SIGN_MASK as u32) as u16;
        let exponent = ((bits >> 23) & 0xFF) as i32;
        let mantissa = bits & 0x007F_FFFF;

        if exponent == 0xFF {
            return if mantissa == 0 {
                HalfFloat(sign | EXP_MASK)
            } else {
                HalfFloat(sign | EXP_MASK | 0x1)
            };
        }

        let centered = exponent - 127;
        if centered > 15 {
            return HalfFloat(sign | EXP_MASK);
        }

        if centered > -15 {
            let half_exp = ((centered + 15) as u16) << 10;
            return HalfFloat(sign | half_exp | (mantissa >> 13) as u16);
        }

        // Subnormal half, implicit leading one made explicit.
        let full_mantissa = 0x0080_0000 | mantissa;
        let shift = (-(centered + 14)) as u32;
        let shifted = full_mantissa.checked_shr(shift).unwrap_or(0);
        HalfFloat(sign | (shifted >> 13) as u16)
    }

    #[inline]
    pub fn is_nan(self) -> bool {
        (self.0 & EXP_MASK) == EXP_MASK && (self.0 & MANTISSA_MASK) != 0
    }
}

impl From<HalfFloat> for f32 {
    fn from(h: HalfFloat) -> f32 {
        h.to_f32()
    }
}

impl From<f32> for HalfFloat {
    fn from(v: f32) -> HalfFloat {
        HalfFloat::from_f32(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::half::f16;

    #[test]
    fn test_to_f32_matches_reference_for_all_bit_patterns() {
        for bits in 0..=u16::MAX {
            let ours = HalfFloat(bits).to_f32();
            let reference = f16::from_bits(bits).to_f32();
            if reference.is_nan() {
                assert!(ours.is_nan(), "bits {:#06x}", bits);
            } else {
                assert_eq!(ours.to_bits(), reference.to_bits(), "bits {:#06x}", bits);
            }
        }
    }

    #[test]
    fn test_from_f32_is_exact_on_representable_values() {
        for bits in 0..=u16::MAX {
            let h = HalfFloat(bits);
            if h.is_nan() {
                assert!(HalfFloat::from_f32(h.to_f32()).is_nan());
                continue;
            }
            assert_eq!(HalfFloat::from_f32(h.to_f32()), h, "bits {:#06x}", bits);
        }
    }

    #[test]
    fn test_from_f32_out_of_range() {
        assert_eq!(HalfFloat::from_f32(1.0e6), HalfFloat::INFINITY);
        assert_eq!(HalfFloat::from_f32(-1.0e6), HalfFloat::NEG_INFINITY);
        assert_eq!(HalfFloat::from_f32(f32::INFINITY), HalfFloat::INFINITY);
        assert!(HalfFloat::from_f32(f32::NAN).is_nan());
        assert_eq!(HalfFloat::from_f32(1.0e-10).to_bits(), 0);
        assert_eq!(HalfFloat::from_f32(-1.0e-10).to_bits(), SIGN_MASK);
    }

    #[test]
    fn test_from_f32_truncates() {
        // 1 + 2^-11 sits between two halves; truncation keeps the lower one.
        let v = 1.0f32 + 2.0f32.powi(-11);
        assert_eq!(HalfFloat::from_f32(v).to_f32(), 1.0);
        assert_eq!(HalfFloat::from_f32(0.5).to_bits(), f16::from_f32(0.5).to_bits());
    }
}
