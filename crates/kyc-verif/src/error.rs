//! Error taxonomy for the verification engine.
//!
//! Every facade operation reports failures through a [`KycResult`](crate::KycResult)
//! value; `KycError` is the typed form used internally and converted at
//! the boundary. Each variant owns a stable negative result code.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by the verification engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KycError {
    /// Operation requires an initialized engine
    #[error("engine not initialized")]
    NotInitialized,

    /// `init` called while a session is active
    #[error("engine already initialized")]
    AlreadyInitialized,

    /// Configuration document rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Bad dimensions, stride, buffer length or orientation
    #[error("invalid image descriptor: {0}")]
    InvalidImageDescriptor(String),

    /// JPEG metadata carries no usable orientation tag
    #[error("no EXIF data: {0}")]
    NoExifData(String),

    /// File open/read failure
    #[error("io error: {0}")]
    Io(String),

    /// Buffer allocation failure
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// Encoded image could not be decoded
    #[error("decode failure: {0}")]
    Decode(String),

    /// Verification backend failed or panicked
    #[error("backend failure: {0}")]
    Backend(String),

    /// Submission raced with `de_init`
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl KycError {
    /// Stable negative result code for this error.
    pub fn code(&self) -> i32 {
        match self {
            KycError::NotInitialized => -1,
            KycError::AlreadyInitialized => -2,
            KycError::InvalidConfig(_) => -3,
            KycError::InvalidImageDescriptor(_) => -4,
            KycError::NoExifData(_) => -5,
            KycError::Io(_) => -6,
            KycError::Allocation(_) => -7,
            KycError::Decode(_) => -8,
            KycError::Backend(_) => -9,
            KycError::ShuttingDown => -10,
        }
    }
}

impl From<std::io::Error> for KycError {
    fn from(err: std::io::Error) -> Self {
        KycError::Io(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for KycError {
    fn from(err: std::collections::TryReserveError) -> Self {
        KycError::Allocation(err.to_string())
    }
}

/// Result type alias using [`KycError`].
pub type Result<T> = std::result::Result<T, KycError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let errors = [
            KycError::NotInitialized,
            KycError::AlreadyInitialized,
            KycError::InvalidConfig(ConfigError::NotAnObject),
            KycError::InvalidImageDescriptor(String::new()),
            KycError::NoExifData(String::new()),
            KycError::Io(String::new()),
            KycError::Allocation(String::new()),
            KycError::Decode(String::new()),
            KycError::Backend(String::new()),
            KycError::ShuttingDown,
        ];

        let mut codes: Vec<i32> = errors.iter().map(KycError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_config_sub_reason_in_message() {
        let err = KycError::from(ConfigError::MissingKey("assets_folder"));
        assert!(err.to_string().contains("assets_folder"));
    }
}
