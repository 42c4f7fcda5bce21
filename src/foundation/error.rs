/// Convenience result type used across the cache crate.
pub type SeqCacheResult<T> = Result<T, SeqCacheError>;

/// Error taxonomy for the fallible edges of the cache.
///
/// The in-memory tier itself never fails: misses, duplicate inserts and exhausted budgets are
/// ordinary outcomes. Errors only come from configuration, strip validation and the disk tier.
#[derive(thiserror::Error, Debug)]
pub enum SeqCacheError {
    /// Invalid caller-provided data (strip timing, frame ranges).
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid cache configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Disk tier read/write/layout failures.
    #[error("disk cache error: {0}")]
    Disk(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SeqCacheError {
    /// Build a [`SeqCacheError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`SeqCacheError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`SeqCacheError::Disk`] value.
    pub fn disk(msg: impl Into<String>) -> Self {
        Self::Disk(msg.into())
    }

    /// Build a [`SeqCacheError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
