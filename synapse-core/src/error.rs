//! Error types for the Synapse system.

/// Result type alias for Synapse operations.
pub type Result<T> = std::result::Result<T, SynapseError>;

/// Main error type for the Synapse system.
///
/// Every error that crosses the engine boundary is one of these variants;
/// internal errors are mapped before they surface.
#[derive(Debug, thiserror::Error)]
pub enum SynapseError {
    /// Malformed caller input (bad type tag, empty payload, invalid regex, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Vector length does not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Referenced entity does not exist
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Relationship tag outside the closed verb vocabulary
    #[error("Invalid verb: {0}")]
    InvalidVerb(String),

    /// Write attempted while the engine is in read-only mode
    #[error("Engine is read-only")]
    ReadOnly,

    /// Write attempted while the engine is frozen
    #[error("Engine is frozen")]
    Frozen,

    /// Transient storage failure, retries exhausted
    #[error("Storage unavailable for key {key}: {detail}")]
    StorageUnavailable { key: String, detail: String },

    /// Stored value could not be decoded
    #[error("Storage corrupt at key {key}: {detail}")]
    StorageCorrupt { key: String, detail: String },

    /// Backend is out of space; fatal for writes
    #[error("Storage full")]
    StorageFull,

    /// Migration run aborted
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Operation observed a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SynapseError {
    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new entity-not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::EntityNotFound(id.into())
    }

    /// Create a new invalid verb error
    pub fn invalid_verb(tag: impl Into<String>) -> Self {
        Self::InvalidVerb(tag.into())
    }

    /// Create a new storage-unavailable error
    pub fn unavailable(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            key: key.into(),
            detail: detail.into(),
        }
    }

    /// Create a new storage-corrupt error
    pub fn corrupt(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StorageCorrupt {
            key: key.into(),
            detail: detail.into(),
        }
    }

    /// Create a new migration error
    pub fn migration(msg: impl Into<String>) -> Self {
        Self::MigrationFailed(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_))
    }

    /// Check if this error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    /// Check if this is a mode error (read-only or frozen)
    pub fn is_mode_error(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::Frozen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SynapseError::DimensionMismatch {
            expected: 384,
            got: 768,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 384, got 768");

        let err = SynapseError::unavailable("nouns/abc", "connection reset");
        assert!(err.to_string().contains("nouns/abc"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_predicates() {
        assert!(SynapseError::not_found("x").is_not_found());
        assert!(SynapseError::ReadOnly.is_mode_error());
        assert!(SynapseError::Frozen.is_mode_error());
        assert!(!SynapseError::StorageFull.is_transient());
    }
}
