//! Conversion between the PLY capture convention (metres, Y down, Z forward)
//! and the storage convention (centimetres, Z up).
//!
//! The axis remap `(x, y, z) -> (x, -z, -y)` is its own inverse, so the
//! same swizzle serves both directions.

use crate::common::{linear_to_srgb, sigmoid, srgb_to_linear, SH_C0, UNITS_PER_METRE};
use glam::{Quat, Vec3, Vec4};

#[inline]
fn remap_axes(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, -v.y)
}

#[inline]
pub fn position_from_ply(p: Vec3) -> Vec3 {
    remap_axes(p) * UNITS_PER_METRE
}

#[inline]
pub fn position_to_ply(p: Vec3) -> Vec3 {
    remap_axes(p / UNITS_PER_METRE)
}

/// `log_scale` holds the raw `scale_0..2` values (natural log of std-dev).
#[inline]
pub fn scale_from_ply(log_scale: Vec3) -> Vec3 {
    Vec3::new(log_scale.x.exp(), log_scale.z.exp(), log_scale.y.exp()) * UNITS_PER_METRE
}

#[inline]
pub fn scale_to_ply(scale: Vec3) -> Vec3 {
    let s = (scale / UNITS_PER_METRE).max(Vec3::splat(f32::MIN_POSITIVE));
    Vec3::new(s.x.ln(), s.z.ln(), s.y.ln())
}

/// `wxyz` is `(rot_0, rot_1, rot_2, rot_3)` as stored in the PLY body.
pub fn rotation_from_ply(wxyz: Vec4) -> Quat {
    let q = Quat::from_xyzw(wxyz.y, wxyz.z, wxyz.w, wxyz.x);
    let len = q.length();
    let q = if len > 0.0 && len.is_finite() {
        q / len
    } else {
        Quat::IDENTITY
    };
    Quat::from_xyzw(q.x, -q.z, -q.y, q.w)
}

/// Returns `(rot_0, rot_1, rot_2, rot_3)`.
pub fn rotation_to_ply(q: Quat) -> Vec4 {
    Vec4::new(q.w, q.x, -q.z, -q.y)
}

/// `dc` is `(f_dc_0, f_dc_1, f_dc_2)`, result alpha is the logistic of `opacity`.
pub fn color_from_ply(dc: Vec3, opacity: f32) -> Vec4 {
    let rgb = dc * SH_C0 + Vec3::splat(0.5);
    Vec4::new(
        srgb_to_linear(rgb.x),
        srgb_to_linear(rgb.y),
        srgb_to_linear(rgb.z),
        sigmoid(opacity),
    )
}

/// Returns `(f_dc_0, f_dc_1, f_dc_2, opacity)`.
pub fn color_to_ply(color: Vec4) -> Vec4 {
    let srgb = Vec3::new(
        linear_to_srgb(color.x),
        linear_to_srgb(color.y),
        linear_to_srgb(color.z),
    );
    let dc = (srgb - Vec3::splat(0.5)) / SH_C0;
    let alpha = color.w.clamp(1e-6, 1.0 - 1e-6);
    Vec4::new(dc.x, dc.y, dc.z, (alpha / (1.0 - alpha)).ln())
}

/// `raw` is `(trbf_center, trbf_scale, motion_0, .., motion_5)`.
pub fn temporal_from_ply(raw: [f32; 8]) -> (Vec4, Vec4) {
    let [center, trbf_scale, m0, m1, m2, m3, m4, m5] = raw;
    let time = Vec4::new(center, trbf_scale, m0, -m2);
    let motion = Vec4::new(-m1, m3, -m5, -m4);
    (time, motion)
}
