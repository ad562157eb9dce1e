use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Duplicate key: {0}")]
    DuplicateKey(u64),
    #[error("Key not found: {0}")]
    NotFound(u64),
    #[error("Key {0} is not present in the neighbor index")]
    KeyNotIndexed(u64),
    #[error("Index unavailable for shard {shard}: {reason}")]
    IndexUnavailable { shard: String, reason: String },
    #[error("Already destroyed: {0}")]
    Destroyed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Space not found: {0}")]
    SpaceNotFound(String),
    #[error("Space already exists: {0}")]
    SpaceAlreadyExists(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpaceError {
    /// Errors the caller can fix by retrying with different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::DuplicateKey(_)
                | Self::NotFound(_)
                | Self::KeyNotIndexed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpaceError>;

/// Shared guard for every vector entering the engine.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(SpaceError::DimensionMismatch {
            expected,
            got: vector.len(),
        });
    }
    Ok(())
}
