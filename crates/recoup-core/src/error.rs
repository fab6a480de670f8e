//! Dunning engine errors

use thiserror::Error;

/// Errors returned by the campaign service, detector and engine
#[derive(Error, Debug)]
pub enum DunningError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Storage error: {0}")]
    Storage(recoup_common::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for the dunning engine
pub type Result<T> = std::result::Result<T, DunningError>;

impl From<recoup_common::Error> for DunningError {
    fn from(e: recoup_common::Error) -> Self {
        match e {
            recoup_common::Error::NotFound(msg) => DunningError::NotFound(msg),
            recoup_common::Error::Validation(msg) => DunningError::Validation(msg),
            recoup_common::Error::Duplicate(msg) => DunningError::Duplicate(msg),
            other => DunningError::Storage(other),
        }
    }
}

impl DunningError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DunningError::Duplicate(_))
    }
}
