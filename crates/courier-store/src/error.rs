use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A unique constraint rejected the write.  `field` is `table.column`.
    #[error("Duplicate value for {field}")]
    Duplicate { field: String },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Classify a write error, turning unique-constraint failures into
    /// [`StoreError::Duplicate`].
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, Some(ref msg)) = err {
            if failure.code == ErrorCode::ConstraintViolation {
                if let Some(field) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    return Self::Duplicate {
                        field: field.trim().to_string(),
                    };
                }
            }
        }
        Self::Sqlite(err)
    }

    /// Map `QueryReturnedNoRows` to [`StoreError::NotFound`].
    pub(crate) fn from_lookup(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            other => Self::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
