//! Crate error types

use thiserror::Error;

/// Errors raised by training, evaluation, and model assembly
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid hyperparameter value or combination, raised before any compute
    #[error("Invalid hyperparameters: {0}")]
    Configuration(String),

    /// Structural mismatch between the model and its inputs or labels
    #[error("Model error: {0}")]
    Model(String),

    /// Operation requested on unready state
    #[error("{0}")]
    User(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for histoflow operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("dropout must be within [0, 1]".into());
        assert!(format!("{err}").contains("Invalid hyperparameters"));

        let err = Error::Model("missing event input".into());
        assert!(format!("{err}").contains("Model error"));
        assert!(format!("{err}").contains("missing event input"));

        let err = Error::User("model has not been loaded".into());
        assert_eq!(format!("{err}"), "model has not been loaded");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
