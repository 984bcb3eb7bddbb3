//! Loyalty Ledger Library
//!
//! Multi-tenant loyalty-points core: an append-only points ledger with
//! exactly-once writes, per-customer concurrency control, and versioned
//! points-computation rules.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (ledger entries, rules, directory records)
//! - [`infra`] - Infrastructure implementations (PostgreSQL stores, audit)
//! - [`api`] - REST API routes
//! - [`server`] - HTTP server bootstrap
//! - [`migrations`] - Embedded SQLx migrations

pub mod api;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod server;

// Re-export commonly used types
pub use domain::{
    compute_points, AppendOutcome, CustomerId, EarnReceipt, EarnRequest, EntrySource, EntryType,
    IdempotencyKey, LedgerEntry, MerchantId, NewLedgerEntry, RedeemReceipt, RedeemRequest,
    RedemptionId, RewardId, RoundingMode, RuleVersion,
};

pub use infra::{
    DirectoryStore, LedgerError, LedgerStore, LoyaltyService, Result, RuleStore,
};
