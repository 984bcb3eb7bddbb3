//! PostgreSQL loyalty service: the balance-affecting operations.
//!
//! # Locking discipline
//!
//! Every earn, redeem, adjust, and reversal runs as one transaction that
//! first takes a row-level exclusive lock on the customer record:
//!
//! ```sql
//! SELECT status FROM customers
//!     WHERE merchant_id = $1 AND id = $2 FOR UPDATE;
//! ```
//!
//! The lock is held until commit or rollback, so all balance-affecting
//! operations for one (merchant, customer) pair are linearized while
//! different customers proceed independently. The redemption threshold
//! check reads the balance inside the lock; two concurrent redemptions can
//! therefore never both observe a balance that accounts for neither's
//! deduction.
//!
//! # Idempotency
//!
//! Each operation probes for its idempotency key under the lock and
//! short-circuits to the original outcome on a hit, before any threshold
//! check. A replayed redemption succeeds even if the balance has since
//! dropped below the reward cost: the caller is told what already happened,
//! not what would happen now.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{
    compute_points, AdjustReceipt, AdjustRequest, AppendOutcome, CustomerId, CustomerStatus,
    EarnReceipt, EarnRequest, EntryId, EntrySource, EntryType, LedgerEntry, MerchantId,
    NewLedgerEntry, RedeemReceipt, RedeemRequest, Redemption, RedemptionId, RedemptionStatus,
    ReverseRedemptionReceipt, ReverseRedemptionRequest, RewardId, RuleVersionId,
};
use crate::infra::{
    AuditAction, AuditRecordBuilder, LedgerError, LoyaltyService, PgAuditLogger, Result,
};

use super::{PgLedgerStore, PgRuleStore};

/// PostgreSQL-backed loyalty service.
#[derive(Clone)]
pub struct PgLoyaltyService {
    pool: PgPool,
}

impl PgLoyaltyService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Take the per-customer exclusive lock and return the customer status.
    async fn lock_customer_tx(
        tx: &mut Transaction<'_, Postgres>,
        merchant_id: MerchantId,
        customer_id: CustomerId,
    ) -> Result<CustomerStatus> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status FROM customers
            WHERE merchant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(merchant_id.0)
        .bind(customer_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        let (status,) = row.ok_or(LedgerError::CustomerNotFound(customer_id))?;
        CustomerStatus::parse(&status)
            .ok_or_else(|| LedgerError::Internal(format!("unknown customer status: {status}")))
    }

    /// A replayed entry must belong to the requesting customer and carry the
    /// expected type; anything else means the key was spent on a different
    /// logical operation.
    fn check_replayed_entry(
        entry: &LedgerEntry,
        customer_id: CustomerId,
        expected_type: EntryType,
    ) -> Result<()> {
        if entry.customer_id != customer_id || entry.entry_type != expected_type {
            return Err(LedgerError::Validation(format!(
                "idempotency key {:?} was already used by a different operation",
                entry.idempotency_key.as_str()
            )));
        }
        Ok(())
    }

    async fn rule_version_number_tx(
        tx: &mut Transaction<'_, Postgres>,
        rule_version_id: RuleVersionId,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT version FROM rule_versions WHERE id = $1")
            .bind(rule_version_id.0)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.0)
    }

    async fn fetch_redemption_by_entry_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: EntryId,
    ) -> Result<Option<Redemption>> {
        let row: Option<RedemptionRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, customer_id, reward_id, ledger_entry_id,
                   points_cost, status, created_at
            FROM redemptions
            WHERE ledger_entry_id = $1
            "#,
        )
        .bind(entry_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Redemption::try_from).transpose()
    }

    /// The reward's points cost, if it exists, is active, and belongs to
    /// this merchant. Inactive rewards fail the same way as absent ones.
    async fn fetch_reward_cost_tx(
        tx: &mut Transaction<'_, Postgres>,
        merchant_id: MerchantId,
        reward_id: RewardId,
    ) -> Result<i64> {
        let row: Option<(i64, bool)> = sqlx::query_as(
            "SELECT points_cost, active FROM rewards WHERE merchant_id = $1 AND id = $2",
        )
        .bind(merchant_id.0)
        .bind(reward_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some((points_cost, true)) => Ok(points_cost),
            Some((_, false)) | None => Err(LedgerError::RewardNotFound(reward_id)),
        }
    }
}

#[async_trait]
impl LoyaltyService for PgLoyaltyService {
    #[instrument(skip(self, request), fields(
        merchant_id = %request.merchant_id,
        customer_id = %request.customer_id,
        idempotency_key = %request.idempotency_key,
    ))]
    async fn earn(&self, request: EarnRequest) -> Result<EarnReceipt> {
        if request.amount <= rust_decimal::Decimal::ZERO {
            return Err(LedgerError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if request.idempotency_key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }
        let occurred_at = request.occurred_at.unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;

        let status =
            Self::lock_customer_tx(&mut tx, request.merchant_id, request.customer_id).await?;
        if status == CustomerStatus::Blocked {
            return Err(LedgerError::CustomerBlocked(request.customer_id));
        }

        if let Some(existing) = PgLedgerStore::fetch_by_key_tx(
            &mut tx,
            request.merchant_id,
            &request.idempotency_key,
        )
        .await?
        {
            Self::check_replayed_entry(&existing, request.customer_id, EntryType::Earn)?;
            let balance =
                PgLedgerStore::balance_tx(&mut tx, request.merchant_id, request.customer_id)
                    .await?;
            let rule_version = match existing.rule_version_id {
                Some(rid) => Self::rule_version_number_tx(&mut tx, rid).await?,
                None => 0,
            };
            tx.commit().await?;
            return Ok(EarnReceipt {
                entry_id: existing.id,
                points_delta: existing.points_delta,
                balance,
                rule_version,
                idempotent: true,
            });
        }

        let rule = PgRuleStore::resolve_active_tx(&mut tx, request.merchant_id, occurred_at).await?;
        let points = compute_points(request.amount, &rule).ok_or_else(|| {
            LedgerError::Validation(format!(
                "points computation failed for amount {}",
                request.amount
            ))
        })?;

        let mut new_entry = NewLedgerEntry::new(
            request.merchant_id,
            request.customer_id,
            EntryType::Earn,
            points,
            request.source,
            request.idempotency_key.clone(),
        )
        .with_rule_version(rule.id);
        if let Some(external_id) = &request.external_id {
            new_entry = new_entry.with_external_id(external_id.clone());
        }

        let outcome = PgLedgerStore::append_tx(&mut tx, &new_entry).await?;
        let entry = outcome.entry().clone();
        let idempotent = outcome.is_replay();

        let balance =
            PgLedgerStore::balance_tx(&mut tx, request.merchant_id, request.customer_id).await?;
        tx.commit().await?;

        Ok(EarnReceipt {
            entry_id: entry.id,
            points_delta: entry.points_delta,
            balance,
            rule_version: rule.version,
            idempotent,
        })
    }

    #[instrument(skip(self, request), fields(
        merchant_id = %request.merchant_id,
        customer_id = %request.customer_id,
        reward_id = %request.reward_id,
        idempotency_key = %request.idempotency_key,
    ))]
    async fn redeem(&self, request: RedeemRequest) -> Result<RedeemReceipt> {
        if request.idempotency_key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let status =
            Self::lock_customer_tx(&mut tx, request.merchant_id, request.customer_id).await?;
        if status == CustomerStatus::Blocked {
            return Err(LedgerError::CustomerBlocked(request.customer_id));
        }

        if let Some(existing) = PgLedgerStore::fetch_by_key_tx(
            &mut tx,
            request.merchant_id,
            &request.idempotency_key,
        )
        .await?
        {
            Self::check_replayed_entry(&existing, request.customer_id, EntryType::Redeem)?;
            let redemption = Self::fetch_redemption_by_entry_tx(&mut tx, existing.id)
                .await?
                .ok_or_else(|| {
                    LedgerError::IdempotencyConflict(
                        request.idempotency_key.as_str().to_string(),
                    )
                })?;
            let balance =
                PgLedgerStore::balance_tx(&mut tx, request.merchant_id, request.customer_id)
                    .await?;
            tx.commit().await?;
            return Ok(RedeemReceipt {
                redemption_id: redemption.id,
                entry_id: existing.id,
                points_cost: redemption.points_cost,
                balance,
                idempotent: true,
            });
        }

        let points_cost =
            Self::fetch_reward_cost_tx(&mut tx, request.merchant_id, request.reward_id).await?;

        // The threshold check is safe because the customer lock is held: no
        // concurrent operation can change this balance before we commit.
        let balance =
            PgLedgerStore::balance_tx(&mut tx, request.merchant_id, request.customer_id).await?;
        if balance < points_cost {
            return Err(LedgerError::InsufficientPoints {
                balance,
                required: points_cost,
            });
        }

        let new_entry = NewLedgerEntry::new(
            request.merchant_id,
            request.customer_id,
            EntryType::Redeem,
            -points_cost,
            EntrySource::Pos,
            request.idempotency_key.clone(),
        );

        let entry = match PgLedgerStore::append_tx(&mut tx, &new_entry).await? {
            AppendOutcome::Created(entry) => entry,
            // A same-key request for a different customer slipped in between
            // our probe and insert; hand back its outcome.
            AppendOutcome::Replayed(existing) => {
                Self::check_replayed_entry(&existing, request.customer_id, EntryType::Redeem)?;
                let redemption = Self::fetch_redemption_by_entry_tx(&mut tx, existing.id)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::IdempotencyConflict(
                            request.idempotency_key.as_str().to_string(),
                        )
                    })?;
                tx.commit().await?;
                return Ok(RedeemReceipt {
                    redemption_id: redemption.id,
                    entry_id: existing.id,
                    points_cost: redemption.points_cost,
                    balance,
                    idempotent: true,
                });
            }
        };

        let redemption_id = RedemptionId::new();
        sqlx::query(
            r#"
            INSERT INTO redemptions (
                id, merchant_id, customer_id, reward_id, ledger_entry_id, points_cost
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(redemption_id.0)
        .bind(request.merchant_id.0)
        .bind(request.customer_id.0)
        .bind(request.reward_id.0)
        .bind(entry.id.0)
        .bind(points_cost)
        .execute(&mut *tx)
        .await?;

        let record = AuditRecordBuilder::new(
            request.merchant_id,
            &request.actor,
            AuditAction::RewardRedeemed,
        )
        .target("redemption", redemption_id)
        .details(serde_json::json!({
            "customer_id": request.customer_id,
            "reward_id": request.reward_id,
            "ledger_entry_id": entry.id,
            "points_cost": points_cost,
        }))
        .build();
        PgAuditLogger::log_tx(&mut tx, &record).await?;

        tx.commit().await?;

        Ok(RedeemReceipt {
            redemption_id,
            entry_id: entry.id,
            points_cost,
            balance: balance - points_cost,
            idempotent: false,
        })
    }

    #[instrument(skip(self, request), fields(
        merchant_id = %request.merchant_id,
        customer_id = %request.customer_id,
        idempotency_key = %request.idempotency_key,
    ))]
    async fn adjust(&self, request: AdjustRequest) -> Result<AdjustReceipt> {
        if request.points_delta == 0 {
            return Err(LedgerError::Validation(
                "points_delta must be non-zero".to_string(),
            ));
        }
        if request.reason.trim().is_empty() {
            return Err(LedgerError::Validation(
                "an adjustment requires a reason".to_string(),
            ));
        }
        if request.idempotency_key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // Adjustments are owner corrections; they apply to blocked customers
        // as well, so only existence is checked here.
        Self::lock_customer_tx(&mut tx, request.merchant_id, request.customer_id).await?;

        if let Some(existing) = PgLedgerStore::fetch_by_key_tx(
            &mut tx,
            request.merchant_id,
            &request.idempotency_key,
        )
        .await?
        {
            Self::check_replayed_entry(&existing, request.customer_id, EntryType::Adjust)?;
            let balance =
                PgLedgerStore::balance_tx(&mut tx, request.merchant_id, request.customer_id)
                    .await?;
            tx.commit().await?;
            return Ok(AdjustReceipt {
                entry_id: existing.id,
                points_delta: existing.points_delta,
                balance,
                idempotent: true,
            });
        }

        let new_entry = NewLedgerEntry::new(
            request.merchant_id,
            request.customer_id,
            EntryType::Adjust,
            request.points_delta,
            EntrySource::Admin,
            request.idempotency_key.clone(),
        );
        let outcome = PgLedgerStore::append_tx(&mut tx, &new_entry).await?;
        if let AppendOutcome::Replayed(existing) = &outcome {
            Self::check_replayed_entry(existing, request.customer_id, EntryType::Adjust)?;
        }
        let idempotent = outcome.is_replay();
        let entry = outcome.into_entry();

        if !idempotent {
            let record = AuditRecordBuilder::new(
                request.merchant_id,
                &request.actor,
                AuditAction::PointsAdjusted,
            )
            .target("ledger_entry", entry.id)
            .details(serde_json::json!({
                "customer_id": request.customer_id,
                "points_delta": request.points_delta,
                "reason": request.reason,
            }))
            .build();
            PgAuditLogger::log_tx(&mut tx, &record).await?;
        }

        let balance =
            PgLedgerStore::balance_tx(&mut tx, request.merchant_id, request.customer_id).await?;
        tx.commit().await?;

        Ok(AdjustReceipt {
            entry_id: entry.id,
            points_delta: entry.points_delta,
            balance,
            idempotent,
        })
    }

    #[instrument(skip(self, request), fields(
        merchant_id = %request.merchant_id,
        redemption_id = %request.redemption_id,
        idempotency_key = %request.idempotency_key,
    ))]
    async fn reverse_redemption(
        &self,
        request: ReverseRedemptionRequest,
    ) -> Result<ReverseRedemptionReceipt> {
        if request.idempotency_key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // First read identifies the customer so the lock can be taken in the
        // customer-first order every other operation uses.
        let probe: Option<(Uuid,)> = sqlx::query_as(
            "SELECT customer_id FROM redemptions WHERE merchant_id = $1 AND id = $2",
        )
        .bind(request.merchant_id.0)
        .bind(request.redemption_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let (customer_id,) =
            probe.ok_or(LedgerError::RedemptionNotFound(request.redemption_id))?;
        let customer_id = CustomerId::from_uuid(customer_id);

        Self::lock_customer_tx(&mut tx, request.merchant_id, customer_id).await?;

        if let Some(existing) = PgLedgerStore::fetch_by_key_tx(
            &mut tx,
            request.merchant_id,
            &request.idempotency_key,
        )
        .await?
        {
            Self::check_replayed_entry(&existing, customer_id, EntryType::Reversal)?;
            let balance =
                PgLedgerStore::balance_tx(&mut tx, request.merchant_id, customer_id).await?;
            tx.commit().await?;
            return Ok(ReverseRedemptionReceipt {
                redemption_id: request.redemption_id,
                entry_id: existing.id,
                points_returned: existing.points_delta,
                balance,
                idempotent: true,
            });
        }

        // Re-read under the customer lock; status may have flipped while we
        // waited.
        let row: Option<RedemptionRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, customer_id, reward_id, ledger_entry_id,
                   points_cost, status, created_at
            FROM redemptions
            WHERE merchant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(request.merchant_id.0)
        .bind(request.redemption_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let redemption = row
            .map(Redemption::try_from)
            .transpose()?
            .ok_or(LedgerError::RedemptionNotFound(request.redemption_id))?;

        if redemption.status == RedemptionStatus::Reversed {
            return Err(LedgerError::Validation(format!(
                "redemption {} is already reversed",
                redemption.id
            )));
        }

        let new_entry = NewLedgerEntry::new(
            request.merchant_id,
            customer_id,
            EntryType::Reversal,
            redemption.points_cost,
            EntrySource::Admin,
            request.idempotency_key.clone(),
        )
        .with_external_id(redemption.id.to_string());
        let outcome = PgLedgerStore::append_tx(&mut tx, &new_entry).await?;
        if let AppendOutcome::Replayed(existing) = &outcome {
            Self::check_replayed_entry(existing, customer_id, EntryType::Reversal)?;
        }
        let entry = outcome.into_entry();

        sqlx::query("UPDATE redemptions SET status = 'reversed' WHERE id = $1")
            .bind(redemption.id.0)
            .execute(&mut *tx)
            .await?;

        let record = AuditRecordBuilder::new(
            request.merchant_id,
            &request.actor,
            AuditAction::RedemptionReversed,
        )
        .target("redemption", redemption.id)
        .details(serde_json::json!({
            "customer_id": customer_id,
            "ledger_entry_id": entry.id,
            "points_returned": redemption.points_cost,
        }))
        .build();
        PgAuditLogger::log_tx(&mut tx, &record).await?;

        let balance = PgLedgerStore::balance_tx(&mut tx, request.merchant_id, customer_id).await?;
        tx.commit().await?;

        Ok(ReverseRedemptionReceipt {
            redemption_id: redemption.id,
            entry_id: entry.id,
            points_returned: redemption.points_cost,
            balance,
            idempotent: false,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RedemptionRow {
    id: Uuid,
    merchant_id: Uuid,
    customer_id: Uuid,
    reward_id: Uuid,
    ledger_entry_id: Uuid,
    points_cost: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RedemptionRow> for Redemption {
    type Error = LedgerError;

    fn try_from(row: RedemptionRow) -> Result<Self> {
        let status = RedemptionStatus::parse(&row.status).ok_or_else(|| {
            LedgerError::Internal(format!("unknown redemption status: {}", row.status))
        })?;

        Ok(Redemption {
            id: RedemptionId::from_uuid(row.id),
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            reward_id: RewardId::from_uuid(row.reward_id),
            ledger_entry_id: EntryId::from_uuid(row.ledger_entry_id),
            points_cost: row.points_cost,
            status,
            created_at: row.created_at,
        })
    }
}
