//! PostgreSQL directory store: merchants, customers, tokens, rewards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{
    Customer, CustomerId, CustomerStatus, Merchant, MerchantId, Reward, RewardId, Token, TokenId,
    TokenStatus, TokenType,
};
use crate::infra::{DirectoryStore, LedgerError, Result};

use super::is_unique_violation;

/// Attempts before giving up on generating a non-colliding token value.
const MAX_TOKEN_ATTEMPTS: u32 = 3;

/// PostgreSQL-backed directory store.
#[derive(Clone)]
pub struct PgDirectoryStore {
    pool: PgPool,
}

impl PgDirectoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn validate_slug(slug: &str) -> Result<()> {
        let ok = !slug.is_empty()
            && slug.len() <= 64
            && slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if ok {
            Ok(())
        } else {
            Err(LedgerError::Validation(format!(
                "slug must be 1-64 lowercase URL-safe characters, got {slug:?}"
            )))
        }
    }

    async fn merchant_exists(&self, merchant_id: MerchantId) -> Result<()> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM merchants WHERE id = $1")
            .bind(merchant_id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Ok(()),
            None => Err(LedgerError::MerchantNotFound(merchant_id)),
        }
    }

    async fn fetch_token(&self, merchant_id: MerchantId, token_id: TokenId) -> Result<Token> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, customer_id, token_type, public_value,
                   status, issued_at, revoked_at
            FROM tokens
            WHERE merchant_id = $1 AND id = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(token_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Token::try_from)
            .transpose()?
            .ok_or(LedgerError::TokenNotFound)
    }
}

#[async_trait]
impl DirectoryStore for PgDirectoryStore {
    #[instrument(skip(self))]
    async fn create_merchant(&self, slug: &str, display_name: &str) -> Result<Merchant> {
        Self::validate_slug(slug)?;
        if display_name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "display name must not be empty".to_string(),
            ));
        }

        let id = MerchantId::new();
        let inserted: std::result::Result<(DateTime<Utc>,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO merchants (id, slug, display_name)
            VALUES ($1, $2, $3)
            RETURNING created_at
            "#,
        )
        .bind(id.0)
        .bind(slug)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok((created_at,)) => Ok(Merchant {
                id,
                slug: slug.to_string(),
                display_name: display_name.to_string(),
                created_at,
            }),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::Validation(format!(
                "slug {slug:?} is already taken"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn get_merchant(&self, merchant_id: MerchantId) -> Result<Merchant> {
        let row: Option<MerchantRow> = sqlx::query_as(
            "SELECT id, slug, display_name, created_at FROM merchants WHERE id = $1",
        )
        .bind(merchant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Merchant::from)
            .ok_or(LedgerError::MerchantNotFound(merchant_id))
    }

    #[instrument(skip(self))]
    async fn get_merchant_by_slug(&self, slug: &str) -> Result<Merchant> {
        let row: Option<MerchantRow> = sqlx::query_as(
            "SELECT id, slug, display_name, created_at FROM merchants WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Merchant::from)
            .ok_or_else(|| LedgerError::Validation(format!("unknown merchant slug {slug:?}")))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn create_customer(&self, merchant_id: MerchantId) -> Result<Customer> {
        self.merchant_exists(merchant_id).await?;

        let id = CustomerId::new();
        let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO customers (id, merchant_id)
            VALUES ($1, $2)
            RETURNING created_at
            "#,
        )
        .bind(id.0)
        .bind(merchant_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(Customer {
            id,
            merchant_id,
            status: CustomerStatus::Active,
            created_at,
        })
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, customer_id = %customer_id))]
    async fn get_customer(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
    ) -> Result<Customer> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, status, created_at
            FROM customers
            WHERE merchant_id = $1 AND id = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(customer_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Customer::try_from)
            .transpose()?
            .ok_or(LedgerError::CustomerNotFound(customer_id))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, customer_id = %customer_id))]
    async fn set_customer_status(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
        status: CustomerStatus,
    ) -> Result<Customer> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            UPDATE customers
            SET status = $3
            WHERE merchant_id = $1 AND id = $2
            RETURNING id, merchant_id, status, created_at
            "#,
        )
        .bind(merchant_id.0)
        .bind(customer_id.0)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Customer::try_from)
            .transpose()?
            .ok_or(LedgerError::CustomerNotFound(customer_id))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, customer_id = %customer_id))]
    async fn issue_token(
        &self,
        merchant_id: MerchantId,
        customer_id: CustomerId,
        token_type: TokenType,
    ) -> Result<Token> {
        // Verifies the customer belongs to this merchant before issuing.
        self.get_customer(merchant_id, customer_id).await?;

        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let id = TokenId::new();
            let public_value = Token::generate_public_value();

            let inserted: std::result::Result<(DateTime<Utc>,), sqlx::Error> = sqlx::query_as(
                r#"
                INSERT INTO tokens (id, merchant_id, customer_id, token_type, public_value)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING issued_at
                "#,
            )
            .bind(id.0)
            .bind(merchant_id.0)
            .bind(customer_id.0)
            .bind(token_type.as_str())
            .bind(&public_value)
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok((issued_at,)) => {
                    return Ok(Token {
                        id,
                        merchant_id,
                        customer_id,
                        token_type,
                        public_value,
                        status: TokenStatus::Active,
                        issued_at,
                        revoked_at: None,
                    })
                }
                // 128-bit collision within a merchant; roll fresh bytes.
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Internal(format!(
            "could not generate a unique token value after {MAX_TOKEN_ATTEMPTS} attempts"
        )))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, token_id = %token_id))]
    async fn revoke_token(&self, merchant_id: MerchantId, token_id: TokenId) -> Result<Token> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            UPDATE tokens
            SET status = 'revoked', revoked_at = NOW()
            WHERE merchant_id = $1 AND id = $2 AND status = 'active'
            RETURNING id, merchant_id, customer_id, token_type, public_value,
                      status, issued_at, revoked_at
            "#,
        )
        .bind(merchant_id.0)
        .bind(token_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Token::try_from(row),
            // Revoking an already-revoked token is a no-op replay.
            None => self.fetch_token(merchant_id, token_id).await,
        }
    }

    #[instrument(skip(self, public_value), fields(merchant_id = %merchant_id))]
    async fn resolve_token(
        &self,
        merchant_id: MerchantId,
        public_value: &str,
    ) -> Result<(Token, Customer)> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, customer_id, token_type, public_value,
                   status, issued_at, revoked_at
            FROM tokens
            WHERE merchant_id = $1 AND public_value = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(public_value)
        .fetch_optional(&self.pool)
        .await?;

        let token = row
            .map(Token::try_from)
            .transpose()?
            .ok_or(LedgerError::TokenNotFound)?;

        if !token.is_active() {
            return Err(LedgerError::TokenInactive);
        }

        let customer = self.get_customer(merchant_id, token.customer_id).await?;
        if !customer.is_active() {
            return Err(LedgerError::CustomerBlocked(customer.id));
        }

        Ok((token, customer))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn create_reward(
        &self,
        merchant_id: MerchantId,
        name: &str,
        points_cost: i64,
    ) -> Result<Reward> {
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "reward name must not be empty".to_string(),
            ));
        }
        if points_cost <= 0 {
            return Err(LedgerError::Validation(
                "points_cost must be positive".to_string(),
            ));
        }
        self.merchant_exists(merchant_id).await?;

        let id = RewardId::new();
        let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO rewards (id, merchant_id, name, points_cost)
            VALUES ($1, $2, $3, $4)
            RETURNING created_at
            "#,
        )
        .bind(id.0)
        .bind(merchant_id.0)
        .bind(name)
        .bind(points_cost)
        .fetch_one(&self.pool)
        .await?;

        Ok(Reward {
            id,
            merchant_id,
            name: name.to_string(),
            points_cost,
            active: true,
            created_at,
        })
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, reward_id = %reward_id))]
    async fn get_reward(&self, merchant_id: MerchantId, reward_id: RewardId) -> Result<Reward> {
        let row: Option<RewardRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, name, points_cost, active, created_at
            FROM rewards
            WHERE merchant_id = $1 AND id = $2
            "#,
        )
        .bind(merchant_id.0)
        .bind(reward_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Reward::from)
            .ok_or(LedgerError::RewardNotFound(reward_id))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id, reward_id = %reward_id))]
    async fn set_reward_active(
        &self,
        merchant_id: MerchantId,
        reward_id: RewardId,
        active: bool,
    ) -> Result<Reward> {
        let row: Option<RewardRow> = sqlx::query_as(
            r#"
            UPDATE rewards
            SET active = $3
            WHERE merchant_id = $1 AND id = $2
            RETURNING id, merchant_id, name, points_cost, active, created_at
            "#,
        )
        .bind(merchant_id.0)
        .bind(reward_id.0)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Reward::from)
            .ok_or(LedgerError::RewardNotFound(reward_id))
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn list_rewards(&self, merchant_id: MerchantId) -> Result<Vec<Reward>> {
        let rows: Vec<RewardRow> = sqlx::query_as(
            r#"
            SELECT id, merchant_id, name, points_cost, active, created_at
            FROM rewards
            WHERE merchant_id = $1 AND active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .bind(merchant_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reward::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MerchantRow {
    id: Uuid,
    slug: String,
    display_name: String,
    created_at: DateTime<Utc>,
}

impl From<MerchantRow> for Merchant {
    fn from(row: MerchantRow) -> Self {
        Self {
            id: MerchantId::from_uuid(row.id),
            slug: row.slug,
            display_name: row.display_name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    merchant_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = LedgerError;

    fn try_from(row: CustomerRow) -> Result<Self> {
        let status = CustomerStatus::parse(&row.status).ok_or_else(|| {
            LedgerError::Internal(format!("unknown customer status: {}", row.status))
        })?;

        Ok(Customer {
            id: CustomerId::from_uuid(row.id),
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    merchant_id: Uuid,
    customer_id: Uuid,
    token_type: String,
    public_value: String,
    status: String,
    issued_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<TokenRow> for Token {
    type Error = LedgerError;

    fn try_from(row: TokenRow) -> Result<Self> {
        let token_type = TokenType::parse(&row.token_type)
            .ok_or_else(|| LedgerError::Internal(format!("unknown token type: {}", row.token_type)))?;
        let status = TokenStatus::parse(&row.status)
            .ok_or_else(|| LedgerError::Internal(format!("unknown token status: {}", row.status)))?;

        Ok(Token {
            id: TokenId::from_uuid(row.id),
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            token_type,
            public_value: row.public_value,
            status,
            issued_at: row.issued_at,
            revoked_at: row.revoked_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RewardRow {
    id: Uuid,
    merchant_id: Uuid,
    name: String,
    points_cost: i64,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<RewardRow> for Reward {
    fn from(row: RewardRow) -> Self {
        Self {
            id: RewardId::from_uuid(row.id),
            merchant_id: MerchantId::from_uuid(row.merchant_id),
            name: row.name,
            points_cost: row.points_cost,
            active: row.active,
            created_at: row.created_at,
        }
    }
}
