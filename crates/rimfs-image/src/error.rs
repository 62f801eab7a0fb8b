use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported image version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid byte-order marker: {0:#04x}")]
    InvalidByteOrder(u8),

    #[error("content checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt image at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("invalid resource path: {0:?}")]
    InvalidResourcePath(String),

    #[error("image has been closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImageError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            reason: reason.into(),
        }
    }
}

/// Content reads surface through `Node::content` as plain I/O failures.
impl From<ImageError> for rimfs_core::VfsError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Io(e) => rimfs_core::VfsError::Io(e),
            other => rimfs_core::VfsError::Io(std::io::Error::other(other)),
        }
    }
}

pub type ImageResult<T> = Result<T, ImageError>;
