use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize)]
pub enum AppError {
    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    /// The clipboard did not hold what was written to it.
    #[error("Integrity Error: wrote {expected}, read back {actual}")]
    Integrity { expected: String, actual: String },

    #[error("No item with id {0}")]
    NotFound(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Image item has no image path")]
    EmptyPath,

    #[error("Clipboard monitor is already running")]
    AlreadyRunning,

    #[error("Clipboard Error: {0}")]
    Clipboard(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Validation Error: {0}")]
    Validation(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("Serialization error: {}", err))
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => AppError::Io(e.to_string()),
            image::ImageError::Unsupported(e) => AppError::UnsupportedFormat(e.to_string()),
            other => AppError::Decode(other.to_string()),
        }
    }
}

impl From<arboard::Error> for AppError {
    fn from(err: arboard::Error) -> Self {
        AppError::Clipboard(err.to_string())
    }
}

// redb splits its failures into one type per operation
macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AppError {
                fn from(err: $ty) -> Self {
                    AppError::Storage(err.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    ciborium::de::Error<std::io::Error>,
    ciborium::ser::Error<std::io::Error>,
);

pub type AppResult<T> = Result<T, AppError>;
