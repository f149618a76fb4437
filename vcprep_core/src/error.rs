use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the preprocessing pipeline.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("input directory not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("file name does not follow <speaker>_<utterance>.<ext>: {}", .0.display())]
    MalformedFileName(PathBuf),

    #[error("utterance {speaker}_{utterance} found twice: {} and {}", .first.display(), .second.display())]
    DuplicateUtterance {
        speaker: String,
        utterance: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("refusing to reset protected path: {}", .0.display())]
    ProtectedPath(PathBuf),

    #[error("output directory {} is not empty; confirmation required to wipe it", .0.display())]
    OutputNotEmpty(PathBuf),

    #[error("output directory {} would wipe input directory {}", .output.display(), .input.display())]
    OutputContainsInput { output: PathBuf, input: PathBuf },

    #[error("failed to decode {}: {source:#}", .path.display())]
    Decode {
        path: PathBuf,
        source: anyhow::Error,
    },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode array for {}: {source}", .path.display())]
    Npy {
        path: PathBuf,
        source: ndarray_npy::WriteNpyError,
    },

    #[error("failed to write archive {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("failed to encode or parse report {}: {source}", .path.display())]
    Report {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl PrepError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
