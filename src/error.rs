use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Read failure: {0}")]
    ReadFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
