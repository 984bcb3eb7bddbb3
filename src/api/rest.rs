//! REST API endpoints for the loyalty ledger.
//!
//! Thin mapping from HTTP to the core service traits; no business logic
//! lives here. Authorization (who may adjust, who may create rules) is the
//! caller's concern and is expected in front of this router.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    AdjustReceipt, AdjustRequest, Customer, CustomerId, CustomerStatus, EarnReceipt, EarnRequest,
    EntrySource, IdempotencyKey, LedgerEntry, Merchant, MerchantId, NewRuleVersion, RedeemReceipt,
    RedeemRequest, RedemptionId, Reward, RewardId, ReverseRedemptionReceipt,
    ReverseRedemptionRequest, RoundingMode, RuleVersion, Token, TokenId, TokenType,
};
use crate::infra::{AuditRecord, DirectoryStore, LedgerStore, LoyaltyService, RuleStore};
use crate::server::AppState;

use super::error::{ApiError, ErrorCode};

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/merchants", post(create_merchant))
        .route("/v1/merchants/:merchant_id", get(get_merchant))
        .route("/v1/merchants/:merchant_id/customers", post(create_customer))
        .route(
            "/v1/merchants/:merchant_id/customers/:customer_id",
            get(get_customer),
        )
        .route(
            "/v1/merchants/:merchant_id/customers/:customer_id/status",
            post(set_customer_status),
        )
        .route(
            "/v1/merchants/:merchant_id/customers/:customer_id/balance",
            get(get_balance),
        )
        .route(
            "/v1/merchants/:merchant_id/customers/:customer_id/ledger",
            get(list_ledger),
        )
        .route("/v1/merchants/:merchant_id/tokens", post(issue_token))
        .route(
            "/v1/merchants/:merchant_id/tokens/resolve",
            post(resolve_token),
        )
        .route(
            "/v1/merchants/:merchant_id/tokens/:token_id/revoke",
            post(revoke_token),
        )
        .route("/v1/merchants/:merchant_id/rules", post(create_rule_version))
        .route("/v1/merchants/:merchant_id/rules", get(list_rule_versions))
        .route(
            "/v1/merchants/:merchant_id/rules/active",
            get(get_active_rule),
        )
        .route("/v1/merchants/:merchant_id/rewards", post(create_reward))
        .route("/v1/merchants/:merchant_id/rewards", get(list_rewards))
        .route(
            "/v1/merchants/:merchant_id/rewards/:reward_id/active",
            post(set_reward_active),
        )
        .route("/v1/merchants/:merchant_id/earn", post(earn))
        .route("/v1/merchants/:merchant_id/redeem", post(redeem))
        .route("/v1/merchants/:merchant_id/adjust", post(adjust))
        .route(
            "/v1/merchants/:merchant_id/redemptions/:redemption_id/reverse",
            post(reverse_redemption),
        )
        .route("/v1/merchants/:merchant_id/audit", get(list_audit))
}

// ============================================================================
// Merchants and customers
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateMerchantBody {
    slug: String,
    display_name: String,
}

async fn create_merchant(
    State(state): State<AppState>,
    Json(body): Json<CreateMerchantBody>,
) -> Result<(StatusCode, Json<Merchant>), ApiError> {
    let merchant = state
        .directory
        .create_merchant(&body.slug, &body.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(merchant)))
}

async fn get_merchant(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Result<Json<Merchant>, ApiError> {
    let merchant = state
        .directory
        .get_merchant(MerchantId::from_uuid(merchant_id))
        .await?;
    Ok(Json(merchant))
}

async fn create_customer(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let customer = state
        .directory
        .create_customer(MerchantId::from_uuid(merchant_id))
        .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn get_customer(
    State(state): State<AppState>,
    Path((merchant_id, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Customer>, ApiError> {
    let customer = state
        .directory
        .get_customer(
            MerchantId::from_uuid(merchant_id),
            CustomerId::from_uuid(customer_id),
        )
        .await?;
    Ok(Json(customer))
}

#[derive(Debug, Deserialize)]
struct SetCustomerStatusBody {
    status: CustomerStatus,
}

async fn set_customer_status(
    State(state): State<AppState>,
    Path((merchant_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<SetCustomerStatusBody>,
) -> Result<Json<Customer>, ApiError> {
    let customer = state
        .directory
        .set_customer_status(
            MerchantId::from_uuid(merchant_id),
            CustomerId::from_uuid(customer_id),
            body.status,
        )
        .await?;
    Ok(Json(customer))
}

// ============================================================================
// Balance and ledger
// ============================================================================

#[derive(Debug, Serialize)]
struct BalanceResponse {
    merchant_id: MerchantId,
    customer_id: CustomerId,
    balance: i64,
}

async fn get_balance(
    State(state): State<AppState>,
    Path((merchant_id, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let merchant_id = MerchantId::from_uuid(merchant_id);
    let customer_id = CustomerId::from_uuid(customer_id);
    let balance = state.ledger.balance(merchant_id, customer_id).await?;
    Ok(Json(BalanceResponse {
        merchant_id,
        customer_id,
        balance,
    }))
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<i64>,
}

async fn list_ledger(
    State(state): State<AppState>,
    Path((merchant_id, customer_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let entries = state
        .ledger
        .list(
            MerchantId::from_uuid(merchant_id),
            CustomerId::from_uuid(customer_id),
            limit,
        )
        .await?;
    Ok(Json(entries))
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Deserialize)]
struct IssueTokenBody {
    customer_id: Uuid,
    token_type: TokenType,
}

async fn issue_token(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<IssueTokenBody>,
) -> Result<(StatusCode, Json<Token>), ApiError> {
    let token = state
        .directory
        .issue_token(
            MerchantId::from_uuid(merchant_id),
            CustomerId::from_uuid(body.customer_id),
            body.token_type,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn revoke_token(
    State(state): State<AppState>,
    Path((merchant_id, token_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Token>, ApiError> {
    let token = state
        .directory
        .revoke_token(
            MerchantId::from_uuid(merchant_id),
            TokenId::from_uuid(token_id),
        )
        .await?;
    Ok(Json(token))
}

#[derive(Debug, Deserialize)]
struct ResolveTokenBody {
    public_value: String,
}

#[derive(Debug, Serialize)]
struct ResolveTokenResponse {
    token: Token,
    customer: Customer,
}

async fn resolve_token(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<ResolveTokenBody>,
) -> Result<Json<ResolveTokenResponse>, ApiError> {
    let (token, customer) = state
        .directory
        .resolve_token(MerchantId::from_uuid(merchant_id), &body.public_value)
        .await?;
    Ok(Json(ResolveTokenResponse { token, customer }))
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateRuleVersionBody {
    points_per_unit: Decimal,
    rounding: RoundingMode,
    #[serde(default = "default_promo_multiplier")]
    promo_multiplier: Decimal,
    effective_from: Option<DateTime<Utc>>,
    actor: String,
}

fn default_promo_multiplier() -> Decimal {
    Decimal::ONE
}

async fn create_rule_version(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<CreateRuleVersionBody>,
) -> Result<(StatusCode, Json<RuleVersion>), ApiError> {
    let new = NewRuleVersion {
        points_per_unit: body.points_per_unit,
        rounding: body.rounding,
        promo_multiplier: body.promo_multiplier,
        effective_from: body.effective_from.unwrap_or_else(Utc::now),
    };
    let version = state
        .rules
        .create_version(MerchantId::from_uuid(merchant_id), new, &body.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

async fn list_rule_versions(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Result<Json<Vec<RuleVersion>>, ApiError> {
    let versions = state
        .rules
        .list_versions(MerchantId::from_uuid(merchant_id))
        .await?;
    Ok(Json(versions))
}

#[derive(Debug, Deserialize)]
struct ActiveRuleQuery {
    as_of: Option<DateTime<Utc>>,
}

async fn get_active_rule(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Query(query): Query<ActiveRuleQuery>,
) -> Result<Json<RuleVersion>, ApiError> {
    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let version = state
        .rules
        .resolve_active(MerchantId::from_uuid(merchant_id), as_of)
        .await?;
    Ok(Json(version))
}

// ============================================================================
// Rewards
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateRewardBody {
    name: String,
    points_cost: i64,
}

async fn create_reward(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<CreateRewardBody>,
) -> Result<(StatusCode, Json<Reward>), ApiError> {
    let reward = state
        .directory
        .create_reward(
            MerchantId::from_uuid(merchant_id),
            &body.name,
            body.points_cost,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reward)))
}

async fn list_rewards(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Result<Json<Vec<Reward>>, ApiError> {
    let rewards = state
        .directory
        .list_rewards(MerchantId::from_uuid(merchant_id))
        .await?;
    Ok(Json(rewards))
}

#[derive(Debug, Deserialize)]
struct SetRewardActiveBody {
    active: bool,
}

async fn set_reward_active(
    State(state): State<AppState>,
    Path((merchant_id, reward_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<SetRewardActiveBody>,
) -> Result<Json<Reward>, ApiError> {
    let reward = state
        .directory
        .set_reward_active(
            MerchantId::from_uuid(merchant_id),
            RewardId::from_uuid(reward_id),
            body.active,
        )
        .await?;
    Ok(Json(reward))
}

// ============================================================================
// Balance-affecting operations
// ============================================================================

#[derive(Debug, Deserialize)]
struct EarnBody {
    customer_id: Uuid,
    amount: Decimal,
    #[serde(default = "default_source")]
    source: EntrySource,
    idempotency_key: String,
    occurred_at: Option<DateTime<Utc>>,
    external_id: Option<String>,
}

fn default_source() -> EntrySource {
    EntrySource::Terminal
}

async fn earn(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<EarnBody>,
) -> Result<Json<EarnReceipt>, ApiError> {
    let receipt = state
        .loyalty
        .earn(EarnRequest {
            merchant_id: MerchantId::from_uuid(merchant_id),
            customer_id: CustomerId::from_uuid(body.customer_id),
            amount: body.amount,
            source: body.source,
            idempotency_key: IdempotencyKey::new(body.idempotency_key),
            occurred_at: body.occurred_at,
            external_id: body.external_id,
        })
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct RedeemBody {
    customer_id: Uuid,
    reward_id: Uuid,
    idempotency_key: String,
    actor: String,
}

async fn redeem(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<RedeemBody>,
) -> Result<Json<RedeemReceipt>, ApiError> {
    let receipt = state
        .loyalty
        .redeem(RedeemRequest {
            merchant_id: MerchantId::from_uuid(merchant_id),
            customer_id: CustomerId::from_uuid(body.customer_id),
            reward_id: RewardId::from_uuid(body.reward_id),
            idempotency_key: IdempotencyKey::new(body.idempotency_key),
            actor: body.actor,
        })
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct AdjustBody {
    customer_id: Uuid,
    points_delta: i64,
    reason: String,
    idempotency_key: String,
    actor: String,
}

async fn adjust(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(body): Json<AdjustBody>,
) -> Result<Json<AdjustReceipt>, ApiError> {
    let receipt = state
        .loyalty
        .adjust(AdjustRequest {
            merchant_id: MerchantId::from_uuid(merchant_id),
            customer_id: CustomerId::from_uuid(body.customer_id),
            points_delta: body.points_delta,
            reason: body.reason,
            idempotency_key: IdempotencyKey::new(body.idempotency_key),
            actor: body.actor,
        })
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct ReverseRedemptionBody {
    idempotency_key: String,
    actor: String,
}

async fn reverse_redemption(
    State(state): State<AppState>,
    Path((merchant_id, redemption_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReverseRedemptionBody>,
) -> Result<Json<ReverseRedemptionReceipt>, ApiError> {
    let receipt = state
        .loyalty
        .reverse_redemption(ReverseRedemptionRequest {
            merchant_id: MerchantId::from_uuid(merchant_id),
            redemption_id: RedemptionId::from_uuid(redemption_id),
            idempotency_key: IdempotencyKey::new(body.idempotency_key),
            actor: body.actor,
        })
        .await?;
    Ok(Json(receipt))
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<i64>,
}

async fn list_audit(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state
        .audit
        .list_recent(MerchantId::from_uuid(merchant_id), limit)
        .await
        .map_err(|e| ApiError::new(ErrorCode::DatabaseError, e.to_string()))?;
    Ok(Json(records))
}
