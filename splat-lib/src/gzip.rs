use crate::common::{GZIP_MAX_COMPRESSION_LVL, MAX_POINTS};
use crate::error::{Result, SplatError};
use crate::serialize::max_payload_len;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{ErrorKind, Read, Write};

const CHUNK_SIZE: usize = 8192;

#[inline(never)]
pub fn compress_gzip(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let level = Compression::new(level.min(GZIP_MAX_COMPRESSION_LVL));
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), level);
    encoder
        .write_all(data)
        .map_err(|e| SplatError::GzipCompress(format!("Writing data failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SplatError::GzipCompress(format!("Finalizing compression failed: {}", e)))
}

/// Inflates a gzip member no larger than a payload of `MAX_POINTS` points.
#[inline(never)]
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    decompress_gzip_with_limit(data, max_payload_len(MAX_POINTS))
}

/// Inflates a gzip member. Fails on corrupt deflate data, checksum mismatch,
/// a stream that ends before the gzip trailer, or more than `limit` bytes
/// of output.
pub fn decompress_gzip_with_limit(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(limit));
    loop {
        match decoder.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if out.len() + n > limit {
                    return Err(oversized(limit));
                }
                out.extend_from_slice(&buffer[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Gzip stream rejected: {}", e);
                return Err(SplatError::GzipDecompress(format!(
                    "Corrupt or truncated stream: {}",
                    e
                )));
            }
        }
    }
    if decoder.header().is_none() {
        tracing::warn!("Gzip stream rejected: no gzip header");
        return Err(SplatError::GzipDecompress("Missing gzip header".to_string()));
    }
    Ok(out)
}

fn oversized(limit: usize) -> SplatError {
    tracing::warn!("Gzip stream rejected: inflates past {} bytes", limit);
    SplatError::GzipDecompress(format!("Inflated data exceeds {} bytes", limit))
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::tokio::bufread::GzipDecoder;
    use async_compression::tokio::write::GzipEncoder;
    use async_compression::Level;
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    #[inline(never)]
    pub async fn compress_gzip_async(data: &[u8], level: u32) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        let mut encoder = GzipEncoder::with_quality(
            &mut compressed,
            Level::Precise(level.min(GZIP_MAX_COMPRESSION_LVL) as i32),
        );

        encoder.write_all(data)
            .await
            .map_err(|e| SplatError::GzipCompress(e.to_string()))?;

        encoder.shutdown()
            .await
            .map_err(|e| SplatError::GzipCompress(e.to_string()))?;

        Ok(compressed)
    }

    #[inline(never)]
    pub async fn decompress_gzip_async(data: &[u8]) -> Result<Vec<u8>> {
        decompress_gzip_with_limit_async(data, max_payload_len(MAX_POINTS)).await
    }

    pub async fn decompress_gzip_with_limit_async(data: &[u8], limit: usize) -> Result<Vec<u8>> {
        let reader = BufReader::new(Cursor::new(data));
        let mut decoder = GzipDecoder::new(reader).take((limit as u64).saturating_add(1));
        let mut decompressed = Vec::new();

        decoder.read_to_end(&mut decompressed)
            .await
            .map_err(|e| {
                tracing::warn!("Gzip stream rejected: {}", e);
                SplatError::GzipDecompress(e.to_string())
            })?;
        if decompressed.len() > limit {
            return Err(oversized(limit));
        }

        Ok(decompressed)
    }
}
}
