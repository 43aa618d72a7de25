//! Accessory link error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("enumeration failed: {0}")]
    Enumeration(String),

    #[error("open failed: {0}")]
    OpenFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "serial")]
impl From<tokio_serial::Error> for LinkError {
    fn from(e: tokio_serial::Error) -> Self {
        LinkError::OpenFailed(e.to_string())
    }
}
