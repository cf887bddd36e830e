use thiserror::Error;

// SQLite primary/extended result codes for lock contention.
const SQLITE_BUSY_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),
    #[error("concurrent update conflict: {0}")]
    ConcurrentUpdateConflict(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Sql(sqlx::Error),
}

impl SchedulerError {
    /// The caller may retry the whole operation from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentUpdateConflict(_))
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return Self::ConstraintViolation(db_err.message().to_string());
            }
            let busy = db_err
                .code()
                .map(|code| SQLITE_BUSY_CODES.contains(&&*code))
                .unwrap_or(false);
            if busy {
                return Self::ConcurrentUpdateConflict(db_err.message().to_string());
            }
        }
        Self::Sql(err)
    }
}
