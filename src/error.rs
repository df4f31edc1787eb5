use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Everything a job can fail with. The `Display` text becomes the job's
/// `details` once it is marked failed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("illegal file path: {}", path.display())]
    PathTraversal { path: PathBuf },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("download failed: {0}")]
    Fetch(String),

    #[error("download interrupted after {written} bytes: {source}")]
    FetchInterrupted {
        written: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("ffmpeg error: {0}")]
    Remux(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job {0} already exists")]
    DuplicateJob(Uuid),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<zip::result::ZipError> for EngineError {
    fn from(err: zip::result::ZipError) -> Self {
        EngineError::Extraction(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Fetch(err.to_string())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
