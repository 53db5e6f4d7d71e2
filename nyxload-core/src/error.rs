use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid stage '{0}': expected <duration>:<target>")]
    InvalidStage(String),
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("Invalid threshold '{expr}' on {metric}: {reason}")]
    InvalidThreshold {
        metric: String,
        expr: String,
        reason: String,
    },
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Histogram error: {0}")]
    HistogramError(#[from] hdrhistogram::CreationError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
