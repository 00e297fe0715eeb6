use crate::common::{clamp_u8, inv_sigmoid, sigmoid, COLOR_SCALE, FRACTIONAL_BITS, UNITS_PER_METRE};
use crate::error::{Result, SplatError};
use crate::half_float::HalfFloat;
use crate::structures::{PackedGaussians, Point};
use glam::{Quat, Vec3, Vec4};

const ROTATION_SCALE: f32 = 127.5;
const FIXED24_MIN: i32 = -(1 << 23);
const FIXED24_MAX: i32 = (1 << 23) - 1;

/// Quantizes points into the SPZ byte layout. Never fails, out of range
/// values are clamped.
pub fn pack_gaussians(points: &[Point]) -> PackedGaussians {
    let fractional_bits = FRACTIONAL_BITS;
    let sf = (1u32 << fractional_bits) as f32;
    let color_factor = COLOR_SCALE * 255.0;
    let color_offset = 127.5; // 0.5 * 255.0

    let positions: Vec<u8> = points
        .iter()
        .flat_map(|p| p.position.to_array())
        .flat_map(|val| {
            let fixed = ((val / UNITS_PER_METRE * sf).round() as i32).clamp(FIXED24_MIN, FIXED24_MAX);
            [
                (fixed & 0xFF) as u8,
                ((fixed >> 8) & 0xFF) as u8,
                ((fixed >> 16) & 0xFF) as u8,
            ]
        })
        .collect();

    let scales: Vec<u8> = points
        .iter()
        .flat_map(|p| p.scale.to_array())
        .map(|s| clamp_u8(((s / UNITS_PER_METRE).ln() + 10.0) * 16.0))
        .collect();

    let rotations: Vec<u8> = points
        .iter()
        .flat_map(|p| {
            let q = p.rotation;
            let len = q.length();
            let q = if len > 0.0 && len.is_finite() {
                q / len
            } else {
                Quat::IDENTITY
            };
            let scale = if q.w < 0.0 {
                -ROTATION_SCALE
            } else {
                ROTATION_SCALE
            };
            let v = q.xyz() * scale + Vec3::splat(ROTATION_SCALE);
            [clamp_u8(v.x), clamp_u8(v.y), clamp_u8(v.z)]
        })
        .collect();

    let alphas: Vec<u8> = points
        .iter()
        .map(|p| clamp_u8(sigmoid(p.color.w) * 255.0))
        .collect();

    let colors: Vec<u8> = points
        .iter()
        .flat_map(|p| p.color.truncate().to_array())
        .map(|c| clamp_u8(c * color_factor + color_offset))
        .collect();

    PackedGaussians {
        num_points: points.len() as u32,
        sh_degree: 0,
        fractional_bits,
        antialiased: false,
        positions,
        scales,
        rotations,
        alphas,
        colors,
        sh: Vec::new(),
    }
}

#[inline]
fn parse_3bytes(bytes: &[u8]) -> f32 {
    let b0 = bytes[0] as u32;
    let b1 = bytes[1] as u32;
    let b2 = bytes[2] as u32;
    let mut fixed = b0 | (b1 << 8) | (b2 << 16);
    if (fixed & 0x0080_0000) != 0 {
        fixed |= 0xFF00_0000; // Sign extend
    }
    fixed as i32 as f32
}

#[inline]
fn unpack_position(chunk: &[u8], uses_f16: bool, fixed_scale: f32) -> Vec3 {
    if uses_f16 {
        let axis = |i: usize| HalfFloat::from_le_bytes([chunk[i * 2], chunk[i * 2 + 1]]).to_f32();
        // Legacy positions carry no unit scale.
        Vec3::new(axis(0), axis(1), axis(2))
    } else {
        Vec3::new(
            parse_3bytes(&chunk[0..3]),
            parse_3bytes(&chunk[3..6]),
            parse_3bytes(&chunk[6..9]),
        ) * fixed_scale
    }
}

#[inline]
fn unpack_scale(chunk: &[u8]) -> Vec3 {
    let axis = |b: u8| UNITS_PER_METRE * (b as f32 / 16.0 - 10.0).exp();
    Vec3::new(axis(chunk[0]), axis(chunk[1]), axis(chunk[2]))
}

#[inline]
fn unpack_rotation(chunk: &[u8]) -> Quat {
    let rotation_scale = 1.0 / ROTATION_SCALE;
    let xyz = Vec3::new(chunk[0] as f32, chunk[1] as f32, chunk[2] as f32) * rotation_scale
        - Vec3::ONE;
    let w = (1.0 - xyz.length_squared()).max(0.0).sqrt();
    Quat::from_xyzw(xyz.x, xyz.y, xyz.z, w)
}

#[inline]
fn unpack_color(chunk: &[u8], alpha: u8) -> Vec4 {
    let channel = |b: u8| (b as f32 / 255.0 - 0.5) / COLOR_SCALE;
    Vec4::new(
        channel(chunk[0]),
        channel(chunk[1]),
        channel(chunk[2]),
        inv_sigmoid(alpha as f32 / 255.0),
    )
}

#[inline]
fn fixed_scale(pg: &PackedGaussians) -> f32 {
    UNITS_PER_METRE * 2.0f32.powi(-(pg.fractional_bits as i32))
}

/// Decodes a single point. Fails if the buffers disagree with `num_points`
/// or `index` is out of range.
pub fn unpack(pg: &PackedGaussians, index: usize) -> Result<Point> {
    pg.check_sizes()?;
    if index >= pg.num_points as usize {
        return Err(SplatError::SizeMismatch(format!(
            "index {} out of range for {} points",
            index, pg.num_points
        )));
    }

    let stride = pg.position_stride();
    let i3 = index * 3;
    Ok(Point {
        position: unpack_position(
            &pg.positions[index * stride..(index + 1) * stride],
            pg.uses_float16(),
            fixed_scale(pg),
        ),
        rotation: unpack_rotation(&pg.rotations[i3..i3 + 3]),
        scale: unpack_scale(&pg.scales[i3..i3 + 3]),
        color: unpack_color(&pg.colors[i3..i3 + 3], pg.alphas[index]),
        ..Default::default()
    })
}

pub fn unpack_all(pg: &PackedGaussians) -> Result<Vec<Point>> {
    if let Err(e) = pg.check_sizes() {
        tracing::warn!("Refusing to unpack gaussians: {}", e);
        return Err(e);
    }

    let uses_f16 = pg.uses_float16();
    let stride = pg.position_stride();
    let scale = fixed_scale(pg);

    let points = pg
        .positions
        .chunks_exact(stride)
        .zip(pg.scales.chunks_exact(3))
        .zip(pg.rotations.chunks_exact(3))
        .zip(pg.colors.chunks_exact(3).zip(pg.alphas.iter()))
        .map(|(((pos, scl), rot), (col, &alpha))| Point {
            position: unpack_position(pos, uses_f16, scale),
            rotation: unpack_rotation(rot),
            scale: unpack_scale(scl),
            color: unpack_color(col, alpha),
            ..Default::default()
        })
        .collect();

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_point() -> Point {
        Point::new(
            Vec3::new(123.4, -56.7, 8.9),
            Quat::from_axis_angle(Vec3::new(1.0, 2.0, 3.0).normalize(), 0.8),
            Vec3::new(0.5, 3.0, 42.0),
            Vec4::new(0.25, 0.5, 0.75, 1.5),
        )
    }

    fn same_rotation(a: Quat, b: Quat, tol: f32) -> bool {
        // q and -q encode the same rotation
        a.dot(b).abs() > 1.0 - tol
    }

    #[test]
    fn test_single_point_round_trip() {
        let p = sample_point();
        let packed = pack_gaussians(&[p]);
        let q = unpack(&packed, 0).unwrap();

        let pos_tol = UNITS_PER_METRE / 4096.0;
        assert!((q.position - p.position).abs().max_element() <= pos_tol);

        for axis in 0..3 {
            let rel = (q.scale[axis] - p.scale[axis]).abs() / p.scale[axis];
            assert!(rel < 0.07, "axis {} rel error {}", axis, rel);
        }

        assert!(same_rotation(q.rotation, p.rotation, 2e-3));

        for ch in 0..3 {
            let mapped = |c: f32| c * COLOR_SCALE + 0.5;
            assert!((mapped(q.color[ch]) - mapped(p.color[ch])).abs() <= 1.0 / 255.0);
        }
        assert!((sigmoid(q.color.w) - sigmoid(p.color.w)).abs() <= 1.0 / 255.0);
    }

    #[test]
    fn test_negative_w_is_flipped() {
        let mut p = sample_point();
        p.rotation = -p.rotation;
        assert!(p.rotation.w < 0.0);
        let q = unpack(&pack_gaussians(&[p]), 0).unwrap();
        assert!(q.rotation.w >= 0.0);
        assert!(same_rotation(q.rotation, p.rotation, 2e-3));
    }

    #[test]
    fn test_position_sign_extension() {
        let p = Point {
            position: Vec3::new(-1.0, -250.0, 1000.0),
            ..Default::default()
        };
        let packed = pack_gaussians(&[p]);
        assert_eq!(packed.positions.len(), 9);
        // -1cm -> round(-0.01 * 4096) = -41 -> 0xFFFFD7
        assert_eq!(&packed.positions[0..3], &[0xD7, 0xFF, 0xFF]);
        let q = unpack(&packed, 0).unwrap();
        assert!((q.position - p.position).abs().max_element() <= 0.025);
    }

    #[test]
    fn test_position_saturates_at_24_bits() {
        let p = Point {
            position: Vec3::new(1.0e9, -1.0e9, 0.0),
            ..Default::default()
        };
        let packed = pack_gaussians(&[p]);
        assert_eq!(&packed.positions[0..6], &[0xFF, 0xFF, 0x7F, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_packing_clamps_extremes() {
        let p = Point::new(
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::new(1e-9, 1e9, 100.0),
            Vec4::new(-100.0, 100.0, 0.0, 50.0),
        );
        let packed = pack_gaussians(&[p]);
        assert_eq!(packed.scales, vec![0, 255, 160]);
        assert_eq!(packed.colors, vec![0, 255, 128]);
        assert_eq!(packed.alphas, vec![255]);
        assert_eq!(packed.rotations, vec![128, 128, 128]);
    }

    #[test]
    fn test_scale_codec_constants() {
        // 1cm: (ln(0.01) + 10) * 16 = 86.3
        let packed = pack_gaussians(&[Point::default()]);
        assert_eq!(packed.scales, vec![86, 86, 86]);
        let q = unpack(&packed, 0).unwrap();
        assert!((q.scale.x - 100.0 * (86.0f32 / 16.0 - 10.0).exp()).abs() < 1e-5);
    }

    #[test]
    fn test_unpack_all_matches_unpack() {
        let points: Vec<Point> = (0..17)
            .map(|i| {
                let f = i as f32;
                Point::new(
                    Vec3::new(f * 10.0, -f, f * 0.5),
                    Quat::from_rotation_z(f * 0.3),
                    Vec3::splat(0.1 + f),
                    Vec4::new(f * 0.01, 0.2, 0.3, f * 0.1 - 0.8),
                )
            })
            .collect();
        let packed = pack_gaussians(&points);
        let all = unpack_all(&packed).unwrap();
        assert_eq!(all.len(), points.len());
        for (i, p) in all.iter().enumerate() {
            assert_eq!(*p, unpack(&packed, i).unwrap());
        }
    }

    #[test]
    fn test_unpack_rejects_bad_sizes() {
        let mut packed = pack_gaussians(&[sample_point(), sample_point()]);
        packed.colors.pop();
        assert!(matches!(unpack_all(&packed), Err(SplatError::SizeMismatch(_))));
        assert!(unpack(&packed, 0).is_err());

        let packed = pack_gaussians(&[sample_point()]);
        assert!(unpack(&packed, 1).is_err());
    }

    #[test]
    fn test_unpack_legacy_float16_positions() {
        let mut positions = Vec::new();
        for v in [1.5f32, -2.0, 0.25] {
            positions.extend_from_slice(&HalfFloat::from_f32(v).to_bits().to_le_bytes());
        }
        let packed = PackedGaussians {
            num_points: 1,
            fractional_bits: 0,
            positions,
            scales: vec![86; 3],
            rotations: vec![128; 3],
            alphas: vec![128],
            colors: vec![128; 3],
            ..Default::default()
        };
        let p = unpack(&packed, 0).unwrap();
        assert_eq!(p.position, Vec3::new(1.5, -2.0, 0.25));
    }

    #[test]
    fn test_empty_input() {
        let packed = pack_gaussians(&[]);
        assert_eq!(packed.num_points, 0);
        assert!(unpack_all(&packed).unwrap().is_empty());
    }
}
