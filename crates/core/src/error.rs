//! Core error types for spanner

/// Result type alias for spanner
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Device for computation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Device {
    /// Host CPU
    #[default]
    Cpu,
    /// CUDA device by ordinal
    Gpu(u32),
    /// Apple Metal
    Metal,
}

/// Core error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unserializable JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid hyperparameters or mismatched components
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid input data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing file or entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure reported by the tensor backend
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Training diverged
    #[error("Training error: {0}")]
    Training(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("unknown criterion `XE`".to_string());
        assert_eq!(err.to_string(), "Configuration error: unknown criterion `XE`");
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_default_device() {
        assert_eq!(Device::default(), Device::Cpu);
    }
}
