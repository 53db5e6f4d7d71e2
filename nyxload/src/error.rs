use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: key must be set {0}")]
    EnvVarError(&'static str),
    #[error("Configuration error: {key} '{value}' is not a usable endpoint: {reason}")]
    InvalidEndpoint {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Engine(#[from] nyxload_core::Error),
}
