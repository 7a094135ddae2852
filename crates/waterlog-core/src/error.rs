use thiserror::Error;

/// Top-level error type for Waterlog.
///
/// Storage faults carry the driver's message as a string so that this crate
/// stays free of the SQLite dependency; the storage crate classifies driver
/// errors into `Constraint` or `Storage` before they reach callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WaterlogError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Data integrity fault: {0}")]
    DataIntegrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store is closed")]
    Closed,
}

impl WaterlogError {
    /// Whether the error means persisted data is in a state the write path
    /// never produces. Such errors must not be retried or swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WaterlogError::DataIntegrity(_))
    }
}

impl From<toml::de::Error> for WaterlogError {
    fn from(err: toml::de::Error) -> Self {
        WaterlogError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for WaterlogError {
    fn from(err: toml::ser::Error) -> Self {
        WaterlogError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for WaterlogError {
    fn from(err: serde_json::Error) -> Self {
        WaterlogError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Waterlog operations.
pub type Result<T> = std::result::Result<T, WaterlogError>;
