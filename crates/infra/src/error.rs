//! Store error model + sqlx error mapping.

use thiserror::Error;

use funil_core::DomainError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// Unique-constraint violation (duplicate record).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Foreign-key violation (record still referenced).
    #[error("foreign key: {0}")]
    ForeignKey(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // 23505 unique_violation, 23503 foreign_key_violation
                Some("23505") => StoreError::Duplicate(db.message().to_string()),
                Some("23503") => StoreError::ForeignKey(db.message().to_string()),
                _ => StoreError::Backend(db.message().to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl StoreError {
    /// Transient transport-level failure worth one more read attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}
