//! Trait definitions for the loyalty ledger core services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    AdjustReceipt, AdjustRequest, AppendOutcome, Customer, CustomerId, CustomerStatus, EarnReceipt,
    EarnRequest, LedgerEntry, Merchant, MerchantId, NewLedgerEntry, NewRuleVersion, RedeemReceipt,
    RedeemRequest, Reward, RewardId, ReverseRedemptionReceipt, ReverseRedemptionRequest,
    RuleVersion, Token, TokenId, TokenType,
};

use super::Result;

/// The ledger write path and read model.
///
/// Invariant: this is the only component that inserts ledger rows, and no
/// component updates or deletes them. Balance is always derived by summing
/// deltas; it is never stored independently.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append an entry under the `(merchant, idempotency_key)` exactly-once
    /// contract. Replaying a key returns the original entry as
    /// [`AppendOutcome::Replayed`]; it never errors and never writes.
    async fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome>;

    /// Current balance: sum of `points_delta` for the customer, 0 when the
    /// customer has no entries. Computed fresh on every call.
    async fn balance(&self, merchant_id: MerchantId, customer_id: CustomerId) -> Result<i64>;

    /// Ledger entries for a customer, newest first.
    async fn list(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>>;
}

/// Rule version resolution and append-only creation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// The highest rule version effective at or before `as_of`. Fails with
    /// `RulesMissing` when the merchant has no effective version yet.
    async fn resolve_active(
        &self,
        merchant_id: MerchantId,
        as_of: DateTime<Utc>,
    ) -> Result<RuleVersion>;

    /// Append version `current_max + 1`. Concurrent creators never produce
    /// duplicate version numbers.
    async fn create_version(
        &self,
        merchant_id: MerchantId,
        new: NewRuleVersion,
        actor: &str,
    ) -> Result<RuleVersion>;

    /// All versions for a merchant, newest first.
    async fn list_versions(&self, merchant_id: MerchantId) -> Result<Vec<RuleVersion>>;
}

/// The balance-affecting operations, each one transaction serialized per
/// (merchant, customer) via a row lock on the customer record.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoyaltyService: Send + Sync {
    /// Resolve the active rule, compute points, append an `earn` entry.
    async fn earn(&self, request: EarnRequest) -> Result<EarnReceipt>;

    /// Lock, check balance, append a `redeem` entry and its paired
    /// redemption record atomically.
    async fn redeem(&self, request: RedeemRequest) -> Result<RedeemReceipt>;

    /// Manual correction: append an `adjust` entry with an audited reason.
    async fn adjust(&self, request: AdjustRequest) -> Result<AdjustReceipt>;

    /// Compensate an approved redemption with a `reversal` entry.
    async fn reverse_redemption(
        &self,
        request: ReverseRedemptionRequest,
    ) -> Result<ReverseRedemptionReceipt>;
}

/// Merchant, customer, token and reward records: the supporting directory
/// around the ledger. Capability checks (who may call what) stay with the
/// caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn create_merchant(&self, slug: &str, display_name: &str) -> Result<Merchant>;

    async fn get_merchant(&self, merchant_id: MerchantId) -> Result<Merchant>;

    async fn get_merchant_by_slug(&self, slug: &str) -> Result<Merchant>;

    /// Create an anonymous customer (lazily, on first contact).
    async fn create_customer(&self, merchant_id: MerchantId) -> Result<Customer>;

    async fn get_customer(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
    ) -> Result<Customer>;

    async fn set_customer_status(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
        status: CustomerStatus,
    ) -> Result<Customer>;

    /// Issue a token with a fresh opaque public value.
    async fn issue_token(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
        token_type: TokenType,
    ) -> Result<Token>;

    async fn revoke_token(&self, merchant_id: MerchantId, token_id: TokenId) -> Result<Token>;

    /// Resolve a presented public value to the holding customer. Revoked
    /// tokens resolve to `TokenInactive`, blocked holders to
    /// `CustomerBlocked`.
    async fn resolve_token(
        &self,
        merchant_id: MerchantId,
        public_value: &str,
    ) -> Result<(Token, Customer)>;

    async fn create_reward(
        &self,
        merchant_id: MerchantId,
        name: &str,
        points_cost: i64,
    ) -> Result<Reward>;

    async fn get_reward(&self, merchant_id: MerchantId, reward_id: RewardId) -> Result<Reward>;

    async fn set_reward_active(
        &self,
        merchant_id: MerchantId,
        reward_id: RewardId,
        active: bool,
    ) -> Result<Reward>;

    /// Active rewards for a merchant.
    async fn list_rewards(&self, merchant_id: MerchantId) -> Result<Vec<Reward>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntrySource, EntryType, IdempotencyKey};

    /// Consumers of the writer must go through the tagged outcome, so a
    /// replay can never be mistaken for a fresh append.
    #[tokio::test]
    async fn mocked_writer_reports_replays() {
        let merchant_id = MerchantId::new();
        let customer_id = CustomerId::new();

        let original = crate::domain::LedgerEntry {
            id: crate::domain::EntryId::new(),
            merchant_id,
            customer_id,
            entry_type: EntryType::Earn,
            points_delta: 12,
            source: EntrySource::Terminal,
            external_id: None,
            rule_version_id: None,
            idempotency_key: IdempotencyKey::from("k1"),
            created_at: chrono::Utc::now(),
        };

        let mut store = MockLedgerStore::new();
        let replayed = original.clone();
        store
            .expect_append()
            .withf(|entry| entry.idempotency_key.as_str() == "k1")
            .returning(move |_| Ok(AppendOutcome::Replayed(replayed.clone())));
        store
            .expect_balance()
            .returning(|_, _| Ok(12));

        let outcome = store
            .append(NewLedgerEntry::new(
                merchant_id,
                customer_id,
                EntryType::Earn,
                12,
                EntrySource::Terminal,
                IdempotencyKey::from("k1"),
            ))
            .await
            .unwrap();

        assert!(outcome.is_replay());
        assert_eq!(outcome.entry().id, original.id);
        assert_eq!(store.balance(merchant_id, customer_id).await.unwrap(), 12);
    }
}
