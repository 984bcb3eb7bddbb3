//! Audit logging for balance-affecting and policy-affecting operations.
//!
//! Every redeem, adjust, reversal, and rule-version creation emits exactly
//! one audit record, written inside the same transaction as the mutation so
//! the two commit or roll back together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::MerchantId;

/// Audited action types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RuleVersionCreated,
    RewardRedeemed,
    RedemptionReversed,
    PointsAdjusted,
    TokenIssued,
    TokenRevoked,
    Custom(String),
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::RuleVersionCreated => write!(f, "rule_version_created"),
            AuditAction::RewardRedeemed => write!(f, "reward_redeemed"),
            AuditAction::RedemptionReversed => write!(f, "redemption_reversed"),
            AuditAction::PointsAdjusted => write!(f, "points_adjusted"),
            AuditAction::TokenIssued => write!(f, "token_issued"),
            AuditAction::TokenRevoked => write!(f, "token_revoked"),
            AuditAction::Custom(s) => write!(f, "custom:{}", s),
        }
    }
}

fn parse_audit_action(s: &str) -> AuditAction {
    match s {
        "rule_version_created" => AuditAction::RuleVersionCreated,
        "reward_redeemed" => AuditAction::RewardRedeemed,
        "redemption_reversed" => AuditAction::RedemptionReversed,
        "points_adjusted" => AuditAction::PointsAdjusted,
        "token_issued" => AuditAction::TokenIssued,
        "token_revoked" => AuditAction::TokenRevoked,
        s if s.starts_with("custom:") => AuditAction::Custom(s[7..].to_string()),
        _ => AuditAction::Custom(s.to_string()),
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub merchant_id: MerchantId,
    /// Who performed the action (staff id, owner id, "system").
    pub actor: String,
    pub action: AuditAction,
    /// Affected resource type, e.g. "redemption", "rule_version".
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    /// Additional context as JSON.
    pub details: Option<serde_json::Value>,
}

/// Builder for audit records.
pub struct AuditRecordBuilder {
    merchant_id: MerchantId,
    actor: String,
    action: AuditAction,
    target_type: Option<String>,
    target_id: Option<String>,
    details: Option<serde_json::Value>,
}

impl AuditRecordBuilder {
    pub fn new(merchant_id: MerchantId, actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            merchant_id,
            actor: actor.into(),
            action,
            target_type: None,
            target_id: None,
            details: None,
        }
    }

    pub fn target(mut self, target_type: impl Into<String>, target_id: impl ToString) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn build(self) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            merchant_id: self.merchant_id,
            actor: self.actor,
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id,
            details: self.details,
        }
    }
}

/// PostgreSQL-backed audit logger.
#[derive(Clone)]
pub struct PgAuditLogger {
    pool: PgPool,
}

impl PgAuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write an audit record inside the caller's transaction.
    pub async fn log_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &AuditRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, recorded_at, merchant_id, actor, action,
                target_type, target_id, details
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.recorded_at)
        .bind(record.merchant_id.0)
        .bind(&record.actor)
        .bind(record.action.to_string())
        .bind(&record.target_type)
        .bind(&record.target_id)
        .bind(&record.details)
        .execute(&mut **tx)
        .await?;

        tracing::info!(
            action = %record.action,
            actor = %record.actor,
            merchant_id = %record.merchant_id,
            target_type = ?record.target_type,
            target_id = ?record.target_id,
            "audit record"
        );

        Ok(())
    }

    /// Recent audit records for a merchant, newest first.
    pub async fn list_recent(
        &self,
        merchant_id: MerchantId,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<_, AuditRecordRow>(
            r#"
            SELECT id, recorded_at, merchant_id, actor, action,
                   target_type, target_id, details
            FROM audit_log
            WHERE merchant_id = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRecordRow {
    id: Uuid,
    recorded_at: DateTime<Utc>,
    merchant_id: Uuid,
    actor: String,
    action: String,
    target_type: Option<String>,
    target_id: Option<String>,
    details: Option<serde_json::Value>,
}

impl From<AuditRecordRow> for AuditRecord {
    fn from(row: AuditRecordRow) -> Self {
        Self {
            id: row.id,
            recorded_at: row.recorded_at,
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            actor: row.actor,
            action: parse_audit_action(&row.action),
            target_type: row.target_type,
            target_id: row.target_id,
            details: row.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_action_display() {
        assert_eq!(AuditAction::RewardRedeemed.to_string(), "reward_redeemed");
        assert_eq!(
            AuditAction::RuleVersionCreated.to_string(),
            "rule_version_created"
        );
        assert_eq!(
            AuditAction::Custom("export".to_string()).to_string(),
            "custom:export"
        );
    }

    #[test]
    fn audit_action_parse_round_trip() {
        for action in [
            AuditAction::RuleVersionCreated,
            AuditAction::RewardRedeemed,
            AuditAction::RedemptionReversed,
            AuditAction::PointsAdjusted,
            AuditAction::TokenIssued,
            AuditAction::TokenRevoked,
        ] {
            assert_eq!(parse_audit_action(&action.to_string()), action);
        }
        assert!(matches!(
            parse_audit_action("custom:special"),
            AuditAction::Custom(s) if s == "special"
        ));
    }

    #[test]
    fn audit_record_builder() {
        let merchant_id = MerchantId::new();
        let record = AuditRecordBuilder::new(merchant_id, "owner-1", AuditAction::PointsAdjusted)
            .target("ledger_entry", "abc-123")
            .details(serde_json::json!({"reason": "goodwill", "points_delta": 50}))
            .build();

        assert_eq!(record.merchant_id, merchant_id);
        assert_eq!(record.actor, "owner-1");
        assert_eq!(record.target_type.as_deref(), Some("ledger_entry"));
        assert_eq!(record.details.unwrap()["points_delta"], 50);
    }
}
