// estatesync/src/domain/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid path expression: {0}")]
    InvalidPathExpr(String),

    #[error("Invalid mapping rule: {0}")]
    InvalidMappingRule(String),

    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    #[error("Listing operation failed: {0}")]
    ListingOperationFailed(String),

    #[error("Listing not found: {0}")]
    ListingNotFound(String),

    #[error("Media operation failed: {0}")]
    MediaOperationFailed(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Failed to serialize: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        match self {
            DomainError::Other(msg) => DomainError::Other(format!("{}: {}", context.into(), msg)),
            DomainError::RepositoryError(msg) => {
                DomainError::RepositoryError(format!("{}: {}", context.into(), msg))
            }
            DomainError::CheckpointError(msg) => {
                DomainError::CheckpointError(format!("{}: {}", context.into(), msg))
            }
            err => DomainError::Other(format!("{}: {}", context.into(), err)),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::SerializationError(e.to_string())
    }
}
