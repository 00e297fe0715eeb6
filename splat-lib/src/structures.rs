use crate::common::dim_for_degree;
use crate::error::{Result, SplatError};
use glam::{Quat, Vec3, Vec4};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const MAGIC: u32 = 0x5053474E; // 'NGSP'
pub const VERSION: u32 = 2;
pub const LEGACY_VERSION: u32 = 1;
pub const FLAG_ANTIALIASED: u8 = 0x1;

pub const HEADER_SIZE: usize = std::mem::size_of::<PackedGaussiansHeader>();

/// One gaussian splat in storage convention (centimetres, Z up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub position: Vec3,
    pub rotation: Quat,
    /// Per-axis standard deviation, same units as `position`.
    pub scale: Vec3,
    /// rgb from the DC term, alpha in `w`.
    pub color: Vec4,
    pub time: Vec4,
    pub motion: Vec4,
}

impl Default for Point {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            time: Vec4::ZERO,
            motion: Vec4::ZERO,
        }
    }
}

impl Point {
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3, color: Vec4) -> Self {
        Self {
            position,
            rotation,
            scale,
            color,
            ..Default::default()
        }
    }

    #[inline]
    pub fn scale_magnitude(&self) -> f32 {
        self.scale.length()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackedGaussians {
    pub num_points: u32,
    pub sh_degree: u8,
    pub fractional_bits: u8,
    pub antialiased: bool,
    pub positions: Vec<u8>,
    pub scales: Vec<u8>,
    pub rotations: Vec<u8>,
    pub alphas: Vec<u8>,
    pub colors: Vec<u8>,
    /// Higher order SH bytes, carried through untouched.
    pub sh: Vec<u8>,
}

impl PackedGaussians {
    pub fn uses_float16(&self) -> bool {
        let f16_len = self.num_points as usize * 3 * 2;
        self.positions.len() == f16_len && self.num_points > 0
    }

    pub fn version(&self) -> u32 {
        if self.uses_float16() {
            LEGACY_VERSION
        } else {
            VERSION
        }
    }

    #[inline]
    pub(crate) fn position_stride(&self) -> usize {
        if self.uses_float16() {
            6
        } else {
            9
        }
    }

    pub(crate) fn check_sizes(&self) -> Result<()> {
        let np = self.num_points as usize;
        let sh_len = np * dim_for_degree(self.sh_degree) * 3;
        let expected = [
            ("positions", self.positions.len(), np * self.position_stride()),
            ("scales", self.scales.len(), np * 3),
            ("rotations", self.rotations.len(), np * 3),
            ("alphas", self.alphas.len(), np),
            ("colors", self.colors.len(), np * 3),
        ];
        for (name, actual, wanted) in expected {
            if actual != wanted {
                return Err(SplatError::SizeMismatch(format!(
                    "{} has {} bytes, expected {} for {} points",
                    name, actual, wanted, np
                )));
            }
        }
        // Higher bands are optional: absent, or one full section.
        if !self.sh.is_empty() && self.sh.len() != sh_len {
            return Err(SplatError::SizeMismatch(format!(
                "sh has {} bytes, expected 0 or {} for {} points",
                self.sh.len(),
                sh_len,
                np
            )));
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PackedGaussiansHeader {
    pub magic: U32,
    pub version: U32,
    pub num_points: U32,
    pub sh_degree: u8,
    pub fractional_bits: u8,
    pub flags: u8,
    pub reserved: u8,
}

impl PackedGaussiansHeader {
    pub fn for_packed(pg: &PackedGaussians) -> Self {
        Self {
            magic: U32::new(MAGIC),
            version: U32::new(pg.version()),
            num_points: U32::new(pg.num_points),
            sh_degree: pg.sh_degree,
            fractional_bits: pg.fractional_bits,
            flags: if pg.antialiased { FLAG_ANTIALIASED } else { 0 },
            reserved: 0,
        }
    }

    #[inline]
    pub fn antialiased(&self) -> bool {
        (self.flags & FLAG_ANTIALIASED) != 0
    }
}
