use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Backend error: {message}")]
    BackendError { message: String },

    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
