use thiserror::Error;

/// Indexed tar error types
#[derive(Error, Debug)]
pub enum IndexedTarError {
    /// IO error, propagated unchanged from the filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid archive format (header slot, index payload, compression)
    #[error("Invalid archive format: {0}")]
    Format(String),

    /// Requested open mode is not one of `r:`, `x:`, `a:`
    #[error("Requested mode {0:?} is not supported (must be one of r:, x:, a:)")]
    UnsupportedMode(String),

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    State(String),

    /// Wrong entry kind or a member name escaping its destination
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Positional lookup out of bounds
    #[error("Member position {position} out of range (archive holds {len} members)")]
    Range {
        /// Requested position
        position: usize,
        /// Number of indexed members
        len: usize,
    },
}

/// Result type alias for indexed tar operations
pub type Result<T> = std::result::Result<T, IndexedTarError>;
