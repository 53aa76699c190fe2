use thiserror::Error;

/// Core pipeline error taxonomy. Calibration failures are recoverable (the
/// caller substitutes the fallback scale); `NoValidData` is the single fatal
/// condition: neither view produced any usable samples.
#[derive(Debug, Error)]
pub enum Error {
    #[error("calibration failed: {0}")]
    Calibration(String),

    #[error("no valid flow data from either view")]
    NoValidData,

    #[error("failed to open video {0}")]
    VideoOpen(String),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
