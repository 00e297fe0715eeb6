//! The persistent point cloud: canonical point storage, change notification
//! and the asset (de)serialization that picks between raw and quantized
//! storage.

use crate::common::CodecConfig;
use crate::error::{Result, SplatError};
use crate::gzip::{compress_gzip, decompress_gzip_with_limit};
use crate::pack::{pack_gaussians, unpack_all};
use crate::ply::load_points_from_file;
use crate::serialize::{
    deserialize_packed_gaussians_with_limit, max_payload_len, serialize_packed_gaussians,
};
use crate::structures::Point;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Quat, Vec3, Vec4};
use std::io::{Read, Write};
use std::path::Path;

pub const DEFAULT_FEATURE_LEVEL: u32 = 64;

// position, rotation, scale, color, time, motion as f32
const RAW_POINT_SIZE: usize = (3 + 4 + 3 + 4 + 4 + 4) * 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    #[default]
    QuantizedGzip = 1,
}

impl TryFrom<u8> for CompressionMethod {
    type Error = SplatError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::QuantizedGzip),
            other => Err(SplatError::DeserializePackedGaussians(format!(
                "Unknown compression method tag: {}",
                other
            ))),
        }
    }
}

/// Axis aligned box in storage units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn center(&self) -> Vec3 {
        (self.max + self.min) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveKey {
    pub time: f32,
    pub value: f32,
}

/// Step curve: each key holds its value until the next key.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeatureCurve {
    pub keys: Vec<CurveKey>,
}

impl FeatureCurve {
    pub fn eval(&self, time: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };
        let idx = self.keys.partition_point(|k| k.time <= time);
        if idx == 0 {
            first.value
        } else {
            self.keys[idx - 1].value
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&[Point]) + Send>;

/// Owns the canonical point array. Not internally synchronized; callers
/// hold `&mut` for every mutation.
pub struct PointCloud {
    points: Vec<Point>,
    compression_method: CompressionMethod,
    feature_level: u32,
    config: CodecConfig,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PointCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloud")
            .field("point_count", &self.points.len())
            .field("compression_method", &self.compression_method)
            .field("feature_level", &self.feature_level)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            points: Vec::new(),
            compression_method: CompressionMethod::default(),
            feature_level: DEFAULT_FEATURE_LEVEL,
            config,
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    pub fn set_compression_method(&mut self, method: CompressionMethod) {
        self.compression_method = method;
    }

    pub fn feature_level(&self) -> u32 {
        self.feature_level
    }

    pub fn set_feature_level(&mut self, level: u32) {
        self.feature_level = level.max(1);
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&[Point]) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    fn notify(&mut self) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&self.points);
        }
    }

    /// Replaces every point. With `reorder` the points are stably sorted by
    /// descending scale magnitude.
    pub fn set_points(&mut self, points: Vec<Point>, reorder: bool) {
        self.points = points;
        if reorder {
            self.points
                .sort_by(|a, b| b.scale_magnitude().total_cmp(&a.scale_magnitude()));
        }
        self.notify();
    }

    /// Imports a PLY capture. On failure the cloud is left empty.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        match load_points_from_file(path) {
            Ok(points) => {
                self.set_points(points, true);
                Ok(())
            }
            Err(e) => {
                self.set_points(Vec::new(), false);
                Err(e)
            }
        }
    }

    /// Box over all point centres, each expanded by its own scale magnitude.
    pub fn calc_bounds(&self) -> Option<Aabb> {
        let first = self.points.first()?;
        let init = Aabb {
            min: first.position,
            max: first.position,
        };
        Some(self.points.iter().fold(init, |b, p| {
            let r = Vec3::splat(p.scale_magnitude());
            Aabb {
                min: b.min.min(p.position - r),
                max: b.max.max(p.position + r),
            }
        }))
    }

    pub fn calc_feature_curve(&self) -> FeatureCurve {
        let step = (self.points.len() / self.feature_level.max(1) as usize).max(1);
        let keys = self
            .points
            .iter()
            .enumerate()
            .step_by(step)
            .map(|(i, p)| CurveKey {
                time: i as f32,
                value: 4.0 * p.scale_magnitude(),
            })
            .collect();
        FeatureCurve { keys }
    }

    /// Writes the asset: compression tag, then raw points or the
    /// length-prefixed gzip SPZ payload. Nothing is written when the cloud
    /// holds more points than the configured cap.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        let count = self.checked_count()?;
        match self.compression_method {
            CompressionMethod::None => {
                w.write_u8(CompressionMethod::None as u8)?;
                w.write_u32::<LittleEndian>(count)?;
                for p in &self.points {
                    write_raw_point(w, p)?;
                }
            }
            CompressionMethod::QuantizedGzip => {
                let packed = pack_gaussians(&self.points);
                let serialized = serialize_packed_gaussians(&packed)?;
                let compressed = compress_gzip(&serialized, self.config.compression_level)?;
                let len = u32::try_from(compressed.len()).map_err(|_| {
                    SplatError::SerializePackedGaussians(format!(
                        "Compressed payload of {} bytes does not fit the asset",
                        compressed.len()
                    ))
                })?;
                w.write_u8(CompressionMethod::QuantizedGzip as u8)?;
                w.write_u32::<LittleEndian>(len)?;
                w.write_all(&compressed)?;
            }
        }
        Ok(())
    }

    fn checked_count(&self) -> Result<u32> {
        let n = self.points.len();
        if n > self.config.max_points {
            return Err(SplatError::SerializePackedGaussians(format!(
                "Too many points: {} (limit {})",
                n, self.config.max_points
            )));
        }
        u32::try_from(n)
            .map_err(|_| SplatError::SerializePackedGaussians(format!("Too many points: {}", n)))
    }

    /// Reads an asset written by [`PointCloud::save`]. Any failure leaves the
    /// cloud empty; observers are notified either way.
    pub fn load<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let loaded = self.read_asset(r);
        match loaded {
            Ok((method, points)) => {
                self.compression_method = method;
                self.points = points;
                self.notify();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Point cloud load failed: {}", e);
                self.points.clear();
                self.notify();
                Err(e)
            }
        }
    }

    fn read_asset<R: Read>(&self, r: &mut R) -> Result<(CompressionMethod, Vec<Point>)> {
        let method = CompressionMethod::try_from(r.read_u8()?)?;
        let points = match method {
            CompressionMethod::None => {
                let count = r.read_u32::<LittleEndian>()? as usize;
                if count > self.config.max_points {
                    return Err(SplatError::DeserializePackedGaussians(format!(
                        "Too many points: {}",
                        count
                    )));
                }
                // Buffer only what the stream actually holds.
                let expected = count.checked_mul(RAW_POINT_SIZE).ok_or_else(|| {
                    SplatError::DeserializePackedGaussians(format!("Too many points: {}", count))
                })?;
                let mut body = Vec::new();
                r.by_ref().take(expected as u64).read_to_end(&mut body)?;
                if body.len() != expected {
                    return Err(SplatError::DeserializePackedGaussians(format!(
                        "Raw point data truncated, expected {} bytes, got {}",
                        expected,
                        body.len()
                    )));
                }
                let mut cursor = body.as_slice();
                (0..count)
                    .map(|_| read_raw_point(&mut cursor))
                    .collect::<Result<Vec<_>>>()?
            }
            CompressionMethod::QuantizedGzip => {
                let len = r.read_u32::<LittleEndian>()? as usize;
                let mut compressed = Vec::new();
                r.by_ref().take(len as u64).read_to_end(&mut compressed)?;
                if compressed.len() != len {
                    return Err(SplatError::GzipDecompress(format!(
                        "Payload truncated, expected {} bytes, got {}",
                        len,
                        compressed.len()
                    )));
                }
                let raw = decompress_gzip_with_limit(
                    &compressed,
                    max_payload_len(self.config.max_points),
                )?;
                let packed = deserialize_packed_gaussians_with_limit(&raw, self.config.max_points)?;
                unpack_all(&packed)?
            }
        };
        Ok((method, points))
    }
}

fn write_floats<W: Write>(w: &mut W, values: &[f32]) -> Result<()> {
    for &v in values {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

fn read_floats<R: Read, const N: usize>(r: &mut R) -> Result<[f32; N]> {
    let mut out = [0.0f32; N];
    r.read_f32_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

fn write_raw_point<W: Write>(w: &mut W, p: &Point) -> Result<()> {
    write_floats(w, &p.position.to_array())?;
    write_floats(w, &p.rotation.to_array())?;
    write_floats(w, &p.scale.to_array())?;
    write_floats(w, &p.color.to_array())?;
    write_floats(w, &p.time.to_array())?;
    write_floats(w, &p.motion.to_array())
}

fn read_raw_point<R: Read>(r: &mut R) -> Result<Point> {
    Ok(Point {
        position: Vec3::from_array(read_floats(r)?),
        rotation: Quat::from_array(read_floats(r)?),
        scale: Vec3::from_array(read_floats(r)?),
        color: Vec4::from_array(read_floats(r)?),
        time: Vec4::from_array(read_floats(r)?),
        motion: Vec4::from_array(read_floats(r)?),
    })
}
