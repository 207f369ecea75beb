// estatesync/src/application/error.rs
use crate::domain::error::DomainError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("A job is already running for scope '{0}' (token {1})")]
    JobAlreadyRunning(String, String),

    #[error("No checkpoint found for token {0}")]
    UnknownToken(String),

    #[error("Kill switch is active until {0}")]
    KillSwitchActive(chrono::DateTime<chrono::Utc>),

    #[error("Checkpoint refers to missing input: {0}")]
    CheckpointInconsistent(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

impl ApplicationError {
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        match self {
            ApplicationError::Other(msg) => {
                ApplicationError::Other(format!("{}: {}", context.into(), msg))
            }
            ApplicationError::Domain(err) => ApplicationError::Domain(err.context(context)),
            ApplicationError::Validation(msg) => {
                ApplicationError::Validation(format!("{}: {}", context.into(), msg))
            }
            err => ApplicationError::Other(format!("{}: {}", context.into(), err)),
        }
    }
}

impl From<std::io::Error> for ApplicationError {
    fn from(err: std::io::Error) -> Self {
        ApplicationError::Domain(DomainError::IoError(err))
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
