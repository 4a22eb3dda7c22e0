use sea_orm::error::DbErr;
use sea_orm::SqlErr;

/// Error taxonomy shared by every service in the crate.
///
/// `Conflict` is the only variant callers are expected to retry on; the
/// create paths that mint identifiers do so themselves with a bounded loop.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    #[error("Identifier generation exhausted: {0}")]
    GenerationExhausted(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Hash error: {0}")]
    HashError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(crate::validation::collect_violations(&err))
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Whether a caller-side retry of the whole operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Conflict(_))
    }
}

/// Maps a write-path database error, normalizing unique-constraint
/// violations to `Conflict` so callers can retry identifier generation.
pub fn map_write_err(err: DbErr) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            ServiceError::Conflict(format!("unique constraint violated: {detail}"))
        }
        _ => ServiceError::DatabaseError(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_joins_all_violations() {
        let err = ServiceError::ValidationError(vec![
            "Customer CST9999 does not exist".to_string(),
            "Quantity must be a positive number".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("CST9999"));
        assert!(text.contains("Quantity"));
    }

    #[test]
    fn only_conflict_is_retryable() {
        assert!(ServiceError::Conflict("dup".into()).is_retryable());
        assert!(!ServiceError::NotFound("x".into()).is_retryable());
        assert!(!ServiceError::ValidationError(vec![]).is_retryable());
    }
}
