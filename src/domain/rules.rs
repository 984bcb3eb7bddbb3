//! Points-computation rule versions and the points calculator.
//!
//! Rule versions are immutable snapshots of a merchant's points policy.
//! A policy change never edits an existing version; it appends version N+1.
//! The version active at time T is the highest version effective at or
//! before T.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{MerchantId, RuleVersionId};

/// Rounding policy applied to the raw points product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Truncate toward zero. The raw value is non-negative by construction,
    /// so this is a plain floor.
    Floor,
    /// Round to nearest; ties round half away from zero, so 12.5 earns 13.
    Nearest,
}

impl RoundingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundingMode::Floor => "floor",
            RoundingMode::Nearest => "nearest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "floor" => Some(RoundingMode::Floor),
            "nearest" => Some(RoundingMode::Nearest),
            _ => None,
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable, versioned snapshot of a merchant's points policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVersion {
    pub id: RuleVersionId,
    pub merchant_id: MerchantId,
    /// Monotonically increasing per merchant, starting at 1.
    pub version: i64,
    /// Points granted per currency unit spent. Positive.
    pub points_per_unit: Decimal,
    pub rounding: RoundingMode,
    /// Promotional multiplier applied on top of `points_per_unit`. Positive,
    /// 1 when no promotion is running.
    pub promo_multiplier: Decimal,
    pub effective_from: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for appending a new rule version.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRuleVersion {
    pub points_per_unit: Decimal,
    pub rounding: RoundingMode,
    pub promo_multiplier: Decimal,
    pub effective_from: DateTime<Utc>,
}

/// Compute the points earned for a purchase amount under a rule version.
///
/// `raw = amount * points_per_unit * promo_multiplier`, rounded per the
/// rule's mode. Returns `None` for a non-positive amount or if the product
/// overflows; the result is otherwise a non-negative integer.
pub fn compute_points(amount: Decimal, rule: &RuleVersion) -> Option<i64> {
    if amount <= Decimal::ZERO {
        return None;
    }

    let raw = amount
        .checked_mul(rule.points_per_unit)?
        .checked_mul(rule.promo_multiplier)?;

    let rounded = match rule.rounding {
        RoundingMode::Floor => raw.trunc(),
        RoundingMode::Nearest => {
            raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        }
    };

    let points = rounded.to_i64()?;
    debug_assert!(points >= 0);
    Some(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rule(points_per_unit: Decimal, rounding: RoundingMode, promo: Decimal) -> RuleVersion {
        RuleVersion {
            id: RuleVersionId::new(),
            merchant_id: MerchantId::new(),
            version: 1,
            points_per_unit,
            rounding,
            promo_multiplier: promo,
            effective_from: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn floor_truncates_fractional_points() {
        // 12.99 * 1 * 1 = 12.99 -> 12
        let r = rule(dec!(1), RoundingMode::Floor, dec!(1));
        assert_eq!(compute_points(dec!(12.99), &r), Some(12));
    }

    #[test]
    fn nearest_rounds_half_away_from_zero() {
        let r = rule(dec!(1), RoundingMode::Nearest, dec!(1));
        assert_eq!(compute_points(dec!(12.5), &r), Some(13));
        assert_eq!(compute_points(dec!(12.49), &r), Some(12));
        assert_eq!(compute_points(dec!(12.51), &r), Some(13));
    }

    #[test]
    fn promo_multiplier_scales_before_rounding() {
        // 10.00 * 1 * 1.5 = 15
        let r = rule(dec!(1), RoundingMode::Floor, dec!(1.5));
        assert_eq!(compute_points(dec!(10.00), &r), Some(15));

        // 10.30 * 2 * 1.5 = 30.9 -> floor 30, nearest 31
        let floor = rule(dec!(2), RoundingMode::Floor, dec!(1.5));
        assert_eq!(compute_points(dec!(10.30), &floor), Some(30));
        let nearest = rule(dec!(2), RoundingMode::Nearest, dec!(1.5));
        assert_eq!(compute_points(dec!(10.30), &nearest), Some(31));
    }

    #[test]
    fn fractional_points_per_unit() {
        // 25.00 * 0.1 = 2.5 -> floor 2, nearest 3
        let floor = rule(dec!(0.1), RoundingMode::Floor, dec!(1));
        assert_eq!(compute_points(dec!(25.00), &floor), Some(2));
        let nearest = rule(dec!(0.1), RoundingMode::Nearest, dec!(1));
        assert_eq!(compute_points(dec!(25.00), &nearest), Some(3));
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let r = rule(dec!(1), RoundingMode::Floor, dec!(1));
        assert_eq!(compute_points(Decimal::ZERO, &r), None);
        assert_eq!(compute_points(dec!(-5), &r), None);
    }

    #[test]
    fn overflow_is_reported_not_wrapped() {
        let r = rule(Decimal::MAX, RoundingMode::Floor, Decimal::MAX);
        assert_eq!(compute_points(dec!(2), &r), None);
    }
}
