//! PostgreSQL rule version store.
//!
//! Rule versions are append-only: a policy change inserts version
//! `current_max + 1` and never touches existing rows. Concurrent creators
//! race on the `(merchant_id, version)` unique index; the loser observes the
//! conflict and retries with a fresh read of the max, so duplicate version
//! numbers cannot be assigned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{MerchantId, NewRuleVersion, RoundingMode, RuleVersion, RuleVersionId};
use crate::infra::{AuditAction, AuditRecordBuilder, LedgerError, PgAuditLogger, Result, RuleStore};

/// Attempts before giving up on version assignment under contention.
const MAX_VERSION_ATTEMPTS: u32 = 5;

/// PostgreSQL-backed rule version store.
#[derive(Clone)]
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve within the caller's transaction so earn sees a rule snapshot
    /// consistent with its ledger append.
    pub(crate) async fn resolve_active_tx(
        tx: &mut Transaction<'_, Postgres>,
        merchant_id: MerchantId,
        as_of: DateTime<Utc>,
    ) -> Result<RuleVersion> {
        let row: Option<RuleVersionRow> = sqlx::query_as(ACTIVE_RULE_SQL)
            .bind(merchant_id.0)
            .bind(as_of)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(RuleVersion::try_from)
            .transpose()?
            .ok_or(LedgerError::RulesMissing(merchant_id))
    }
}

const ACTIVE_RULE_SQL: &str = r#"
    SELECT id, merchant_id, version, points_per_unit, rounding,
           promo_multiplier, effective_from, created_at
    FROM rule_versions
    WHERE merchant_id = $1 AND effective_from <= $2
    ORDER BY version DESC
    LIMIT 1
"#;

#[async_trait]
impl RuleStore for PgRuleStore {
    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn resolve_active(
        &self,
        merchant_id: MerchantId,
        as_of: DateTime<Utc>,
    ) -> Result<RuleVersion> {
        let row: Option<RuleVersionRow> = sqlx::query_as(ACTIVE_RULE_SQL)
            .bind(merchant_id.0)
            .bind(as_of)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RuleVersion::try_from)
            .transpose()?
            .ok_or(LedgerError::RulesMissing(merchant_id))
    }

    #[instrument(skip(self, new), fields(merchant_id = %merchant_id))]
    async fn create_version(
        &self,
        merchant_id: MerchantId,
        new: NewRuleVersion,
        actor: &str,
    ) -> Result<RuleVersion> {
        if new.points_per_unit <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "points_per_unit must be positive".to_string(),
            ));
        }
        if new.promo_multiplier <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "promo_multiplier must be positive".to_string(),
            ));
        }

        for _ in 0..MAX_VERSION_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            let merchant: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM merchants WHERE id = $1")
                    .bind(merchant_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            if merchant.is_none() {
                return Err(LedgerError::MerchantNotFound(merchant_id));
            }

            let (next_version,): (i64,) = sqlx::query_as(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM rule_versions WHERE merchant_id = $1",
            )
            .bind(merchant_id.0)
            .fetch_one(&mut *tx)
            .await?;

            let id = RuleVersionId::new();
            let inserted: Option<(DateTime<Utc>,)> = sqlx::query_as(
                r#"
                INSERT INTO rule_versions (
                    id, merchant_id, version, points_per_unit, rounding,
                    promo_multiplier, effective_from
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (merchant_id, version) DO NOTHING
                RETURNING created_at
                "#,
            )
            .bind(id.0)
            .bind(merchant_id.0)
            .bind(next_version)
            .bind(new.points_per_unit)
            .bind(new.rounding.as_str())
            .bind(new.promo_multiplier)
            .bind(new.effective_from)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((created_at,)) = inserted else {
                // A concurrent creator claimed this version number; re-read
                // the max and try again.
                tx.rollback().await?;
                continue;
            };

            let version = RuleVersion {
                id,
                merchant_id,
                version: next_version,
                points_per_unit: new.points_per_unit,
                rounding: new.rounding,
                promo_multiplier: new.promo_multiplier,
                effective_from: new.effective_from,
                created_at,
            };

            let record = AuditRecordBuilder::new(merchant_id, actor, AuditAction::RuleVersionCreated)
                .target("rule_version", id)
                .details(serde_json::json!({
                    "version": next_version,
                    "points_per_unit": version.points_per_unit,
                    "rounding": version.rounding.as_str(),
                    "promo_multiplier": version.promo_multiplier,
                    "effective_from": version.effective_from,
                }))
                .build();
            PgAuditLogger::log_tx(&mut tx, &record).await?;

            tx.commit().await?;
            return Ok(version);
        }

        Err(LedgerError::Internal(format!(
            "could not assign a rule version for merchant {merchant_id} after {MAX_VERSION_ATTEMPTS} attempts"
        )))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn list_versions(&self, merchant_id: MerchantId) -> Result<Vec<RuleVersion>> {
        let rows: Vec<RuleVersionRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, version, points_per_unit, rounding,
                   promo_multiplier, effective_from, created_at
            FROM rule_versions
            WHERE merchant_id = $1
            ORDER BY version DESC
            "#,
        )
        .bind(merchant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RuleVersion::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RuleVersionRow {
    id: Uuid,
    merchant_id: Uuid,
    version: i64,
    points_per_unit: Decimal,
    rounding: String,
    promo_multiplier: Decimal,
    effective_from: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RuleVersionRow> for RuleVersion {
    type Error = LedgerError;

    fn try_from(row: RuleVersionRow) -> Result<Self> {
        let rounding = RoundingMode::parse(&row.rounding)
            .ok_or_else(|| LedgerError::Internal(format!("unknown rounding mode: {}", row.rounding)))?;

        Ok(RuleVersion {
            id: RuleVersionId::from_uuid(row.id),
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            version: row.version,
            points_per_unit: row.points_per_unit,
            rounding,
            promo_multiplier: row.promo_multiplier,
            effective_from: row.effective_from,
            created_at: row.created_at,
        })
    }
}
