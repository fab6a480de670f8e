//! Error types for Recoup

use thiserror::Error;

/// Main error type for Recoup
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Payment error: {0}")]
    Payment(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Exchange rate error: {0}")]
    Rate(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Recoup
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::Duplicate(_) => 409,
            Error::Payment(_) => 502,
            Error::Email(_) => 502,
            Error::Rate(_) => 502,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Duplicate(_) => "DUPLICATE",
            Error::Payment(_) => "PAYMENT_ERROR",
            Error::Email(_) => "EMAIL_ERROR",
            Error::Rate(_) => "RATE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error came from an external collaborator rather than
    /// from the caller's input
    pub fn is_external(&self) -> bool {
        matches!(self, Error::Payment(_) | Error::Email(_) | Error::Rate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound("campaign".into()).status_code(), 404);
        assert_eq!(Error::Duplicate("campaign".into()).status_code(), 409);
        assert_eq!(Error::Validation("bad".into()).status_code(), 422);
        assert_eq!(Error::Duplicate("x".into()).code(), "DUPLICATE");
    }

    #[test]
    fn test_external_errors() {
        assert!(Error::Payment("declined".into()).is_external());
        assert!(Error::Email("smtp down".into()).is_external());
        assert!(!Error::Database("gone".into()).is_external());
    }
}
