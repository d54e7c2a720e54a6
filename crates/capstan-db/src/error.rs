//! Database error types.

use capstan_core::ValidationErrors;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<ValidationErrors> for DbError {
    fn from(errors: ValidationErrors) -> Self {
        DbError::Validation(errors)
    }
}

impl From<DbError> for capstan_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => capstan_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => capstan_core::Error::Conflict(msg),
            DbError::Validation(errors) => capstan_core::Error::Validation(errors),
            other => capstan_core::Error::Storage(other.to_string()),
        }
    }
}

/// Whether `err` is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_into_core_errors() {
        let err: capstan_core::Error = DbError::NotFound("stage 1".to_string()).into();
        assert!(matches!(err, capstan_core::Error::NotFound(ref m) if m == "stage 1"));

        let err: capstan_core::Error = DbError::Duplicate("host web1".to_string()).into();
        assert!(matches!(err, capstan_core::Error::Conflict(_)));

        let mut errors = ValidationErrors::new();
        errors.add("name", "has already been taken");
        let err: capstan_core::Error = DbError::from(errors).into();
        match err {
            capstan_core::Error::Validation(errors) => assert_eq!(errors.on("name").len(), 1),
            other => panic!("expected Validation, got {:?}", other),
        }

        let err: capstan_core::Error = DbError::InvalidData("locked = 7".to_string()).into();
        assert!(matches!(err, capstan_core::Error::Storage(_)));
    }
}
