//! Error definitions for the application.

use rust_decimal::Decimal;
use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Validation failures surfaced synchronously, before any side effects
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Rejected lifecycle transitions
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Version conflict for '{id}': expected version {expected}")]
    ConcurrentModification { id: String, expected: i32 },

    #[error("Transaction hash is already set for payment '{0}'")]
    TxHashAlreadySet(String),

    #[error("Refund amount {amount} exceeds payment amount {available}")]
    RefundExceedsPayment { amount: Decimal, available: Decimal },

    #[error("Payment '{0}' already has a completed refund")]
    RefundAlreadyCompleted(String),
}

/// Database-layer failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(err.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Failures talking to external collaborators (proof bridge, receivers)
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Configuration failures at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration '{key}': {message}")]
    Invalid { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display_messages() {
        let err = AppError::Transition(TransitionError::InvalidTransition {
            from: "confirmed".to_string(),
            to: "pending".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Transition error: Invalid transition from 'confirmed' to 'pending'"
        );

        let err = AppError::Database(DatabaseError::NotFound("pay_1".to_string()));
        assert!(err.to_string().contains("pay_1"));

        let err = TransitionError::RefundExceedsPayment {
            amount: dec!(150.00),
            available: dec!(100.00),
        };
        assert_eq!(
            err.to_string(),
            "Refund amount 150.00 exceeds payment amount 100.00"
        );
    }

    #[test]
    fn test_nested_error_conversion() {
        let err: AppError = TransitionError::ConcurrentModification {
            id: "pay_1".to_string(),
            expected: 3,
        }
        .into();
        assert!(matches!(
            err,
            AppError::Transition(TransitionError::ConcurrentModification { .. })
        ));

        let err: AppError = ValidationError::MissingField("amount".to_string()).into();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
