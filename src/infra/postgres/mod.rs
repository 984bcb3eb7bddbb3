//! PostgreSQL implementations of the core service traits.

mod directory;
mod ledger;
mod rules;
mod service;

pub use directory::PgDirectoryStore;
pub use ledger::PgLedgerStore;
pub use rules::PgRuleStore;
pub use service::PgLoyaltyService;

/// Whether a sqlx error is a Postgres unique-constraint violation (23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
