//! Request and receipt types for the balance-affecting operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    CustomerId, EntryId, EntrySource, IdempotencyKey, MerchantId, RedemptionId, RewardId,
};

/// An earn request: points for a purchase amount.
#[derive(Debug, Clone)]
pub struct EarnRequest {
    pub merchant_id: MerchantId,
    pub customer_id: CustomerId,
    /// Purchase amount in currency units. Must be positive.
    pub amount: Decimal,
    pub source: EntrySource,
    pub idempotency_key: IdempotencyKey,
    /// When the purchase happened; selects the active rule version.
    /// Defaults to now.
    pub occurred_at: Option<DateTime<Utc>>,
    /// External correlation id (receipt or order reference).
    pub external_id: Option<String>,
}

/// Outcome of an earn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarnReceipt {
    pub entry_id: EntryId,
    pub points_delta: i64,
    pub balance: i64,
    /// The rule version the points were computed under.
    pub rule_version: i64,
    /// True when this request replayed an earlier one with the same key.
    pub idempotent: bool,
}

/// A redemption request.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub merchant_id: MerchantId,
    pub customer_id: CustomerId,
    pub reward_id: RewardId,
    pub idempotency_key: IdempotencyKey,
    /// Staff member or system performing the redemption; audited.
    pub actor: String,
}

/// Outcome of a redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReceipt {
    pub redemption_id: RedemptionId,
    pub entry_id: EntryId,
    pub points_cost: i64,
    pub balance: i64,
    pub idempotent: bool,
}

/// A manual balance correction. Owner-gated by the caller.
#[derive(Debug, Clone)]
pub struct AdjustRequest {
    pub merchant_id: MerchantId,
    pub customer_id: CustomerId,
    /// Any non-zero signed delta.
    pub points_delta: i64,
    /// Human-readable justification; captured in the audit record.
    pub reason: String,
    pub idempotency_key: IdempotencyKey,
    pub actor: String,
}

/// Outcome of an adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustReceipt {
    pub entry_id: EntryId,
    pub points_delta: i64,
    pub balance: i64,
    pub idempotent: bool,
}

/// Request to reverse a previously approved redemption.
#[derive(Debug, Clone)]
pub struct ReverseRedemptionRequest {
    pub merchant_id: MerchantId,
    pub redemption_id: RedemptionId,
    pub idempotency_key: IdempotencyKey,
    pub actor: String,
}

/// Outcome of a redemption reversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseRedemptionReceipt {
    pub redemption_id: RedemptionId,
    pub entry_id: EntryId,
    pub points_returned: i64,
    pub balance: i64,
    pub idempotent: bool,
}
