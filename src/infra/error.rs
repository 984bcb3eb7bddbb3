//! Error types for the loyalty ledger infrastructure.

use thiserror::Error;

use crate::domain::{CustomerId, MerchantId, RedemptionId, RewardId};

/// Errors raised by ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database error. Transient faults (lock timeouts, lost connections)
    /// surface here; retrying is safe because every mutation carries an
    /// idempotency key.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Merchant not found
    #[error("merchant not found: {0}")]
    MerchantNotFound(MerchantId),

    /// Customer not found
    #[error("customer not found: {0}")]
    CustomerNotFound(CustomerId),

    /// Customer is blocked
    #[error("customer is blocked: {0}")]
    CustomerBlocked(CustomerId),

    /// Reward absent, inactive, or owned by a different merchant
    #[error("reward not found: {0}")]
    RewardNotFound(RewardId),

    /// Redemption not found
    #[error("redemption not found: {0}")]
    RedemptionNotFound(RedemptionId),

    /// Token not found for this merchant
    #[error("token not found")]
    TokenNotFound,

    /// Token exists but is revoked
    #[error("token is not active")]
    TokenInactive,

    /// No rule version is effective yet; earn is blocked until the merchant
    /// configures one
    #[error("no points rule configured for merchant {0}")]
    RulesMissing(MerchantId),

    /// Balance too low for the requested redemption
    #[error("insufficient points: balance {balance}, required {required}")]
    InsufficientPoints { balance: i64, required: i64 },

    /// An idempotency-key insert conflicted but the winning row could not be
    /// read back. This is a storage anomaly, not a normal replay, and is
    /// never swallowed.
    #[error("idempotency conflict for key {0:?}")]
    IdempotencyConflict(String),

    /// Malformed input, rejected before any transaction begins
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether a caller may retry the failed operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Database(_))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_errors_are_retryable() {
        assert!(LedgerError::Database(sqlx::Error::PoolClosed).is_retryable());
        assert!(!LedgerError::RulesMissing(MerchantId::new()).is_retryable());
        assert!(!LedgerError::InsufficientPoints {
            balance: 10,
            required: 50
        }
        .is_retryable());
    }
}
