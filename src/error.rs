use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The video could not be opened or has no decodable video stream.
    #[error("failed to open video {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// A seek landed outside `[0, total)`.
    #[error("frame index {index} is out of range (video has {total} frames)")]
    OutOfRange { index: usize, total: usize },

    /// Split ratios do not sum to 1.0.
    #[error("train + val + test ratios must sum to 1.0, got {sum:.6}")]
    InvalidRatio { sum: f64 },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("manifest error at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("class list must contain at least one class")]
    InvalidClassList,

    #[error("invalid input: {0}")]
    Input(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
