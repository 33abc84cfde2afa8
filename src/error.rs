use thiserror::Error;

pub type Result<T> = std::result::Result<T, PostprocessError>;

#[derive(Debug, Error)]
pub enum PostprocessError {
    /// Bad arguments, rejected before any I/O happens
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Table shapes that cannot be merged or read
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Blob already exists and overwrite is disabled: {0}")]
    BlobExists(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Error: {0}")]
    Other(String),
}

impl PostprocessError {
    /// True for a missing local file or a missing blob
    pub fn is_not_found(&self) -> bool {
        match self {
            PostprocessError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            PostprocessError::BlobNotFound(_) => true,
            _ => false,
        }
    }
}
