use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SplatError>;

#[derive(Debug, Error)]
pub enum SplatError {
    #[error("Failed to parse splats from the buffer: {0}")]
    ParsePly(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("The point cloud is empty.")]
    EmptyPointCloud,

    #[error("Failed to serialize packed gaussians: {0}")]
    SerializePackedGaussians(String),

    #[error("Failed to deserialize packed gaussians: {0}")]
    DeserializePackedGaussians(String),

    #[error("Packed gaussian buffers are inconsistent: {0}")]
    SizeMismatch(String),

    #[error("Gzip compression failed: {0}")]
    GzipCompress(String),

    #[error("Gzip decompression failed: {0}")]
    GzipDecompress(String),

    #[error("An I/O error occurred: {0}")]
    Io(#[from] io::Error),
}

impl SplatError {
    /// True for errors caused by malformed input rather than the environment.
    pub fn is_invalid_data(&self) -> bool {
        !matches!(self, SplatError::Io(_))
    }
}
