//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use loyalty_ledger::domain::{
    Customer, EarnReceipt, EarnRequest, EntrySource, IdempotencyKey, Merchant, NewRuleVersion,
    Reward, RoundingMode, RuleVersion,
};
use loyalty_ledger::infra::{
    DirectoryStore, LoyaltyService, PgAuditLogger, PgDirectoryStore, PgLedgerStore,
    PgLoyaltyService, PgRuleStore, RuleStore,
};

/// Connect to the test database, or `None` when DATABASE_URL is unset.
pub async fn connect_db() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .ok()?;
    Some(pool)
}

/// A unique idempotency key for one logical test operation.
pub fn key(prefix: &str) -> IdempotencyKey {
    IdempotencyKey::new(format!("{}-{}", prefix, Uuid::new_v4()))
}

/// A unique merchant slug so tests never collide on a shared database.
pub fn unique_slug(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8])
}

/// All the services wired to one pool, plus a fresh merchant per test.
pub struct TestContext {
    pub pool: PgPool,
    pub merchant: Merchant,
    pub directory: PgDirectoryStore,
    pub rules: PgRuleStore,
    pub ledger: PgLedgerStore,
    pub loyalty: PgLoyaltyService,
    pub audit: PgAuditLogger,
}

/// Connect, migrate, and create a fresh merchant. Returns `None` when no
/// database is configured so callers can skip.
pub async fn test_context(slug_prefix: &str) -> Option<TestContext> {
    let pool = connect_db().await?;
    loyalty_ledger::migrations::run_postgres(&pool)
        .await
        .expect("migrations apply");

    let directory = PgDirectoryStore::new(pool.clone());
    let merchant = directory
        .create_merchant(&unique_slug(slug_prefix), "Test Merchant")
        .await
        .expect("create merchant");

    Some(TestContext {
        directory,
        rules: PgRuleStore::new(pool.clone()),
        ledger: PgLedgerStore::new(pool.clone()),
        loyalty: PgLoyaltyService::new(pool.clone()),
        audit: PgAuditLogger::new(pool.clone()),
        merchant,
        pool,
    })
}

impl TestContext {
    pub async fn customer(&self) -> Customer {
        self.directory
            .create_customer(self.merchant.id)
            .await
            .expect("create customer")
    }

    /// Append a rule version effective at `effective_from`.
    pub async fn rule(
        &self,
        points_per_unit: Decimal,
        rounding: RoundingMode,
        promo_multiplier: Decimal,
        effective_from: DateTime<Utc>,
    ) -> RuleVersion {
        self.rules
            .create_version(
                self.merchant.id,
                NewRuleVersion {
                    points_per_unit,
                    rounding,
                    promo_multiplier,
                    effective_from,
                },
                "test-owner",
            )
            .await
            .expect("create rule version")
    }

    /// A plain 1-point-per-unit floor rule effective an hour ago.
    pub async fn default_rule(&self) -> RuleVersion {
        self.rule(
            Decimal::ONE,
            RoundingMode::Floor,
            Decimal::ONE,
            Utc::now() - chrono::Duration::hours(1),
        )
        .await
    }

    pub async fn reward(&self, name: &str, points_cost: i64) -> Reward {
        self.directory
            .create_reward(self.merchant.id, name, points_cost)
            .await
            .expect("create reward")
    }

    /// Earn `amount` for a customer with a fresh idempotency key.
    pub async fn earn(&self, customer: &Customer, amount: Decimal) -> EarnReceipt {
        self.loyalty
            .earn(EarnRequest {
                merchant_id: self.merchant.id,
                customer_id: customer.id,
                amount,
                source: EntrySource::Terminal,
                idempotency_key: key("earn"),
                occurred_at: None,
                external_id: None,
            })
            .await
            .expect("earn")
    }
}
