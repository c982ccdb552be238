use rusqlite::ErrorCode;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the entity layer, already sorted by who is to blame.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage failure: {0}")]
    Internal(#[source] rusqlite::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => StoreError::Cancelled,
            // Pre-checks run first; this only fires if a unique index catches
            // something they did not.
            Some(ErrorCode::ConstraintViolation) => {
                StoreError::Conflict("record violates a uniqueness or reference constraint".into())
            }
            _ => StoreError::Internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_maps_to_cancelled() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert!(matches!(StoreError::from(err), StoreError::Cancelled));
    }

    #[test]
    fn other_sqlite_errors_are_internal() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(StoreError::from(err), StoreError::Internal(_)));
    }
}
