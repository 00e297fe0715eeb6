pub mod cloud;
pub mod common;
pub mod coords;
pub mod error;
pub mod gzip;
pub mod half_float;
pub mod pack;
pub mod ply;
pub mod serialize;
mod structures;

pub use cloud::{Aabb, CompressionMethod, FeatureCurve, PointCloud, SubscriptionId};
pub use common::CodecConfig;
pub use error::{Result, SplatError};
pub use half_float::HalfFloat;
pub use ply::{load_points_from_file, parse_splat, write_ply};
pub use serialize::read_header;
pub use structures::{PackedGaussians, PackedGaussiansHeader, Point, HEADER_SIZE, MAGIC, VERSION};

use gzip::{compress_gzip, decompress_gzip};
use pack::{pack_gaussians, unpack_all};
use serialize::{deserialize_packed_gaussians_with_limit, serialize_packed_gaussians};

fn prepare_uncompressed(points: &[Point], config: &CodecConfig) -> Result<Vec<u8>> {
    if points.is_empty() {
        return Err(SplatError::EmptyPointCloud);
    }
    if points.len() > config.max_points {
        return Err(SplatError::SerializePackedGaussians(format!(
            "Too many points: {} (limit {})",
            points.len(),
            config.max_points
        )));
    }
    let packed = pack_gaussians(points);
    serialize_packed_gaussians(&packed)
}

fn finish_decompressed(uncompressed: &[u8], config: &CodecConfig) -> Result<Vec<Point>> {
    let packed = deserialize_packed_gaussians_with_limit(uncompressed, config.max_points)?;
    if packed.num_points == 0 {
        return Err(SplatError::EmptyPointCloud);
    }
    unpack_all(&packed)
}

/// Quantizes, serializes and gzips `points` into an SPZ byte stream.
pub fn compress(points: &[Point], config: &CodecConfig) -> Result<Vec<u8>> {
    let uncompressed = prepare_uncompressed(points, config)?;
    tracing::debug!(
        "Packed {} points into {} bytes",
        points.len(),
        uncompressed.len()
    );
    compress_gzip(&uncompressed, config.compression_level)
}

pub fn decompress(spz_data: &[u8]) -> Result<Vec<Point>> {
    let uncompressed = decompress_gzip(spz_data)?;
    finish_decompressed(&uncompressed, &CodecConfig::default())
}

fn level_config(compression_level: u32) -> CodecConfig {
    CodecConfig {
        compression_level,
        ..Default::default()
    }
}

/// PLY capture in, SPZ out.
pub fn compress_ply(raw_data: &[u8], compression_level: u32, output: &mut Vec<u8>) -> Result<()> {
    let config = level_config(compression_level);
    let points = ply::parse_splat_with_limit(raw_data, config.max_points)?;
    let compressed = compress(&points, &config)?;
    output.clear();
    output.extend_from_slice(&compressed);
    Ok(())
}

pub fn decompress_to_ply(spz_data: &[u8], include_normals: bool, output: &mut Vec<u8>) -> Result<()> {
    let points = decompress(spz_data)?;
    write_ply(output, &points, include_normals)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use gzip::{compress_gzip_async, decompress_gzip_async};

    #[inline(never)]
    pub async fn compress_async(
        raw_data: &[u8],
        compression_level: u32,
        output: &mut Vec<u8>,
    ) -> Result<()> {
        let config = level_config(compression_level);
        let points = ply::parse_splat_with_limit(raw_data, config.max_points)?;
        let uncompressed = prepare_uncompressed(&points, &config)?;
        let compressed = compress_gzip_async(&uncompressed, config.compression_level).await?;
        output.clear();
        output.extend_from_slice(&compressed);
        Ok(())
    }

    #[inline(never)]
    pub async fn decompress_async(
        spz_data: &[u8],
        include_normals: bool,
        output: &mut Vec<u8>,
    ) -> Result<()> {
        let uncompressed = decompress_gzip_async(spz_data).await?;
        let points = finish_decompressed(&uncompressed, &CodecConfig::default())?;
        write_ply(output, &points, include_normals)
    }
}
}
