/// Errors from node operations.
///
/// Lookups never produce errors: an invalid or missing path is an
/// absent result from [`crate::ImageFs::find_node`]. Errors surface
/// only from operations on a node that already exists.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// `children` was called on a file or link.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// `content` was called on a directory or link.
    #[error("not a regular file: {0}")]
    NotAFile(String),

    /// A link's target could not be resolved through the engine.
    #[error("unresolvable link target: {0}")]
    BrokenLink(String),

    /// A lazy producer ran after the owning filesystem was dropped.
    #[error("filesystem has been dropped")]
    Detached,

    /// I/O failure from the underlying resource provider.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for node operations.
pub type VfsResult<T> = Result<T, VfsError>;
