use thiserror::Error;

/// Failures surfaced by the cache layer.
///
/// A cache miss is not represented here: every read returns `Option` and a
/// missing or expired entry is simply `None`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Not stored: {0}")]
    NotStored(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unregistered value type: {0}")]
    UnregisteredType(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Whether this error came from the encode/decode layer rather than the backend
    pub fn is_encoding(&self) -> bool {
        matches!(self, CacheError::Encoding(_) | CacheError::UnregisteredType(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
