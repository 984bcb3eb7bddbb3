//! Merchant, customer, token, reward and redemption entities.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{
    CustomerId, CustomerStatus, EntryId, MerchantId, RedemptionId, RedemptionStatus, RewardId,
    TokenId, TokenStatus, TokenType,
};

/// A merchant: the tenant boundary for every other entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    /// URL-safe, unique across the platform.
    pub slug: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// An anonymous or claimed identity within a merchant, created lazily on
/// first contact. The customer row is also the lock target that serializes
/// balance-affecting operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub merchant_id: MerchantId,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        matches!(self.status, CustomerStatus::Active)
    }
}

/// A presentable credential bound to exactly one customer.
///
/// A customer may hold several tokens (one per presentation type); each
/// resolves to the same balance. The public value is opaque and random,
/// never derived from the customer identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub merchant_id: MerchantId,
    pub customer_id: CustomerId,
    pub token_type: TokenType,
    pub public_value: String,
    pub status: TokenStatus,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_active(&self) -> bool {
        matches!(self.status, TokenStatus::Active)
    }

    /// Generate a fresh opaque public value: 128 random bits, base64url.
    pub fn generate_public_value() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// A merchant-defined redeemable item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: RewardId,
    pub merchant_id: MerchantId,
    pub name: String,
    /// Always positive.
    pub points_cost: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A record of a reward having been granted.
///
/// Created in the same transaction as its paired `redeem` ledger entry; the
/// two exist together or not at all. The status flip to `reversed` is
/// projection state — the compensating ledger entry is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redemption {
    pub id: RedemptionId,
    pub merchant_id: MerchantId,
    pub customer_id: CustomerId,
    pub reward_id: RewardId,
    /// The paired `redeem` ledger entry.
    pub ledger_entry_id: EntryId,
    /// Cost charged at redemption time; reward prices may change later.
    pub points_cost: i64,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn token_public_values_are_unique_and_urlsafe() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let value = Token::generate_public_value();
            // 16 bytes -> 22 base64url chars, no padding
            assert_eq!(value.len(), 22);
            assert!(value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(value));
        }
    }

    #[test]
    fn customer_active_flag_follows_status() {
        let customer = Customer {
            id: CustomerId::new(),
            merchant_id: MerchantId::new(),
            status: CustomerStatus::Blocked,
            created_at: Utc::now(),
        };
        assert!(!customer.is_active());
    }
}
