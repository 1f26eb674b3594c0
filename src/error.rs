//! Error types for Windowgate.

use thiserror::Error;

/// Main error type for Windowgate operations.
#[derive(Error, Debug)]
pub enum WindowgateError {
    /// Configuration-related errors, raised before a limiter can be built
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store could not complete an increment
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An identity that cannot be used as a store key
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WindowgateError {
    /// Wrap an arbitrary backend failure as [`WindowgateError::StoreUnavailable`].
    pub fn store<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        WindowgateError::StoreUnavailable(err.into())
    }
}

impl From<redis::RedisError> for WindowgateError {
    fn from(err: redis::RedisError) -> Self {
        WindowgateError::StoreUnavailable(Box::new(err))
    }
}

/// Result type alias for Windowgate operations.
pub type Result<T> = std::result::Result<T, WindowgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_errors_map_to_store_unavailable() {
        let err: WindowgateError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(matches!(err, WindowgateError::StoreUnavailable(_)));
        assert!(err.to_string().starts_with("Store unavailable"));
    }

    #[test]
    fn test_store_helper_keeps_message() {
        let err = WindowgateError::store("backend timed out");
        assert_eq!(err.to_string(), "Store unavailable: backend timed out");
    }
}
