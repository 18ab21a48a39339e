use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid search window: start index {start} must not exceed end index {end}")]
    InvalidWindow { start: i64, end: i64 },
    #[error("window step must be positive, got {0}")]
    InvalidStep(i64),
}
