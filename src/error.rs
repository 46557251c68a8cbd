use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while ingesting, validating or persisting
/// subject data.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- input errors --
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no valid inputs were passed")]
    EmptyInput,

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unsupported format '{extension}' for {}: data files must be .npy or .mat", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    // -- format errors --
    /// Raised by a MATLAB decoder that does not understand the on-disk
    /// encoding. The decoder chain moves on to the next decoder only on this.
    #[error("{}: {reason}", path.display())]
    UnsupportedEncoding { path: PathBuf, reason: String },

    #[error("field '{field}' missing from MATLAB file {}", path.display())]
    MissingField { path: PathBuf, field: String },

    #[error("malformed data in {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    // -- consistency errors --
    #[error("all inputs should have the same number of channels, got {counts:?}")]
    ChannelMismatch { counts: Vec<usize> },

    // -- preparation ledger --
    #[error("preparation record {}: {source}", path.display())]
    Preparation {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("data has already been prepared; pass force to replace the preparation")]
    AlreadyPrepared,

    // -- store lifecycle --
    #[error("store has been closed")]
    Closed,

    #[error("invalid window request: {0}")]
    InvalidWindow(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether a decoder failed because it does not handle this encoding.
    pub fn is_unsupported_encoding(&self) -> bool {
        matches!(self, StoreError::UnsupportedEncoding { .. })
    }
}
