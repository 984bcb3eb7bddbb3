//! Ledger entry types.
//!
//! A ledger entry is the atomic, immutable unit of balance change. The
//! balance of a customer is always the sum of `points_delta` over that
//! customer's entries; no other representation of balance exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    CustomerId, EntryId, EntrySource, EntryType, IdempotencyKey, MerchantId, RuleVersionId,
};

/// An immutable, committed ledger entry.
///
/// Entries are never updated or deleted after creation; corrections are
/// expressed as new `reversal` or `adjust` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,

    /// Tenant isolation.
    pub merchant_id: MerchantId,

    pub customer_id: CustomerId,

    pub entry_type: EntryType,

    /// Signed point change. Positive for earn/reversal, negative for redeem,
    /// either sign for adjust.
    pub points_delta: i64,

    pub source: EntrySource,

    /// Correlation identifier supplied by an external system (POS receipt,
    /// order id), metadata only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// The rule version an earn was computed under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_version_id: Option<RuleVersionId>,

    /// Exactly-once contract: unique per merchant.
    pub idempotency_key: IdempotencyKey,

    pub created_at: DateTime<Utc>,
}

/// A ledger entry awaiting insertion.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub merchant_id: MerchantId,
    pub customer_id: CustomerId,
    pub entry_type: EntryType,
    pub points_delta: i64,
    pub source: EntrySource,
    pub external_id: Option<String>,
    pub rule_version_id: Option<RuleVersionId>,
    pub idempotency_key: IdempotencyKey,
}

impl NewLedgerEntry {
    pub fn new(
        merchant_id: MerchantId,
        customer_id: CustomerId,
        entry_type: EntryType,
        points_delta: i64,
        source: EntrySource,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        Self {
            merchant_id,
            customer_id,
            entry_type,
            points_delta,
            source,
            external_id: None,
            rule_version_id: None,
            idempotency_key,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_rule_version(mut self, rule_version_id: RuleVersionId) -> Self {
        self.rule_version_id = Some(rule_version_id);
        self
    }
}

/// Outcome of an idempotency-guarded append.
///
/// The tagged form forces callers to handle the replay path: a `Replayed`
/// entry is the original outcome of an earlier request carrying the same
/// idempotency key and must not trigger further writes.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The insert won; this call created the entry.
    Created(LedgerEntry),
    /// The key was already present; this is the original entry.
    Replayed(LedgerEntry),
}

impl AppendOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            AppendOutcome::Created(e) | AppendOutcome::Replayed(e) => e,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            AppendOutcome::Created(e) | AppendOutcome::Replayed(e) => e,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, AppendOutcome::Replayed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> LedgerEntry {
        LedgerEntry {
            id: EntryId::new(),
            merchant_id: MerchantId::new(),
            customer_id: CustomerId::new(),
            entry_type: EntryType::Earn,
            points_delta: 12,
            source: EntrySource::Terminal,
            external_id: None,
            rule_version_id: None,
            idempotency_key: IdempotencyKey::from("k1"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn append_outcome_exposes_entry_and_replay_flag() {
        let entry = sample_entry();

        let created = AppendOutcome::Created(entry.clone());
        assert!(!created.is_replay());
        assert_eq!(created.entry().points_delta, 12);

        let replayed = AppendOutcome::Replayed(entry);
        assert!(replayed.is_replay());
        assert_eq!(replayed.into_entry().points_delta, 12);
    }

    #[test]
    fn new_entry_builder_sets_optional_fields() {
        let entry = NewLedgerEntry::new(
            MerchantId::new(),
            CustomerId::new(),
            EntryType::Earn,
            10,
            EntrySource::Pos,
            IdempotencyKey::from("k2"),
        )
        .with_external_id("receipt-778")
        .with_rule_version(RuleVersionId::new());

        assert_eq!(entry.external_id.as_deref(), Some("receipt-778"));
        assert!(entry.rule_version_id.is_some());
    }
}
