//! PostgreSQL ledger store.
//!
//! The sole write path into `ledger_entries`. Appends are guarded by the
//! `(merchant_id, idempotency_key)` unique index:
//!
//! ```sql
//! INSERT INTO ledger_entries (...)
//! VALUES (...)
//! ON CONFLICT (merchant_id, idempotency_key) DO NOTHING
//! ```
//!
//! Zero rows affected means the key already won an earlier race; the
//! existing entry is read back and returned as a replay. Two concurrent
//! identical requests therefore need no lock to deduplicate: exactly one
//! insert succeeds and the other observes it.
//!
//! Rows are never updated or deleted. A database trigger enforces this on
//! top of the store's own discipline; corrections are new `reversal` or
//! `adjust` entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{
    AppendOutcome, CustomerId, EntryId, EntrySource, EntryType, IdempotencyKey, LedgerEntry,
    MerchantId, NewLedgerEntry, RuleVersionId,
};
use crate::infra::{LedgerError, LedgerStore, Result};

/// PostgreSQL-backed ledger store.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append within the caller's transaction. Used by the coordinator so
    /// the entry commits atomically with its companion rows.
    pub(crate) async fn append_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewLedgerEntry,
    ) -> Result<AppendOutcome> {
        let id = EntryId::new();

        let inserted: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            INSERT INTO ledger_entries (
                id, merchant_id, customer_id, entry_type, points_delta,
                source, external_id, rule_version_id, idempotency_key
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (merchant_id, idempotency_key) DO NOTHING
            RETURNING created_at
            "#,
        )
        .bind(id.0)
        .bind(entry.merchant_id.0)
        .bind(entry.customer_id.0)
        .bind(entry.entry_type.as_str())
        .bind(entry.points_delta)
        .bind(entry.source.as_str())
        .bind(&entry.external_id)
        .bind(entry.rule_version_id.map(|r| r.0))
        .bind(entry.idempotency_key.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        match inserted {
            Some((created_at,)) => Ok(AppendOutcome::Created(LedgerEntry {
                id,
                merchant_id: entry.merchant_id,
                customer_id: entry.customer_id,
                entry_type: entry.entry_type,
                points_delta: entry.points_delta,
                source: entry.source,
                external_id: entry.external_id.clone(),
                rule_version_id: entry.rule_version_id,
                idempotency_key: entry.idempotency_key.clone(),
                created_at,
            })),
            None => {
                // The key is already present; read back the original entry.
                // Finding nothing here is a storage anomaly, not a replay.
                let existing =
                    Self::fetch_by_key_tx(tx, entry.merchant_id, &entry.idempotency_key).await?;
                match existing {
                    Some(original) => Ok(AppendOutcome::Replayed(original)),
                    None => Err(LedgerError::IdempotencyConflict(
                        entry.idempotency_key.as_str().to_string(),
                    )),
                }
            }
        }
    }

    /// Balance within the caller's transaction, so the redemption threshold
    /// check reflects all entries committed before the customer lock was
    /// acquired.
    pub(crate) async fn balance_tx(
        tx: &mut Transaction<'_, Postgres>,
        merchant_id: MerchantId,
        customer_id: CustomerId,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(points_delta), 0)::BIGINT
            FROM ledger_entries
            WHERE merchant_id = $1 AND customer_id = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(customer_id.0)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.0)
    }

    /// Look up an entry by its idempotency key, if present.
    pub(crate) async fn fetch_by_key_tx(
        tx: &mut Transaction<'_, Postgres>,
        merchant_id: MerchantId,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>> {
        let row: Option<LedgerEntryRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, customer_id, entry_type, points_delta,
                   source, external_id, rule_version_id, idempotency_key, created_at
            FROM ledger_entries
            WHERE merchant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(key.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self, entry), fields(
        merchant_id = %entry.merchant_id,
        customer_id = %entry.customer_id,
        entry_type = %entry.entry_type,
        idempotency_key = %entry.idempotency_key,
    ))]
    async fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome> {
        if entry.idempotency_key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let outcome = Self::append_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, customer_id = %customer_id))]
    async fn balance(&self, merchant_id: MerchantId, customer_id: CustomerId) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(points_delta), 0)::BIGINT
            FROM ledger_entries
            WHERE merchant_id = $1 AND customer_id = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(customer_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, customer_id = %customer_id))]
    async fn list(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerEntryRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, customer_id, entry_type, points_delta,
                   source, external_id, rule_version_id, idempotency_key, created_at
            FROM ledger_entries
            WHERE merchant_id = $1 AND customer_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(merchant_id.0)
        .bind(customer_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    merchant_id: Uuid,
    customer_id: Uuid,
    entry_type: String,
    points_delta: i64,
    source: String,
    external_id: Option<String>,
    rule_version_id: Option<Uuid>,
    idempotency_key: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerEntryRow) -> Result<Self> {
        let entry_type = EntryType::parse(&row.entry_type)
            .ok_or_else(|| LedgerError::Internal(format!("unknown entry type: {}", row.entry_type)))?;
        let source = EntrySource::parse(&row.source)
            .ok_or_else(|| LedgerError::Internal(format!("unknown entry source: {}", row.source)))?;

        Ok(LedgerEntry {
            id: EntryId::from_uuid(row.id),
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            entry_type,
            points_delta: row.points_delta,
            source,
            external_id: row.external_id,
            rule_version_id: row.rule_version_id.map(RuleVersionId::from_uuid),
            idempotency_key: IdempotencyKey::new(row.idempotency_key),
            created_at: row.created_at,
        })
    }
}
