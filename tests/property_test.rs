//! Property-based tests using proptest.
//!
//! These tests verify invariants of the points calculator that should hold
//! for any valid input.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

use loyalty_ledger::domain::{compute_points, MerchantId, RoundingMode, RuleVersion, RuleVersionId};

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

/// Purchase amounts between 0.01 and 100_000.00, two decimal places.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

/// Points-per-unit between 0.01 and 50.00.
fn arb_points_per_unit() -> impl Strategy<Value = Decimal> {
    (1i64..=5_000).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

/// Promotional multipliers between 1.00 and 5.00.
fn arb_promo() -> impl Strategy<Value = Decimal> {
    (100i64..=500).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

fn arb_rounding() -> impl Strategy<Value = RoundingMode> {
    prop_oneof![Just(RoundingMode::Floor), Just(RoundingMode::Nearest)]
}

proptest! {
    /// Property: the calculator is deterministic.
    #[test]
    fn calculator_is_deterministic(
        amount in arb_amount(),
        ppu in arb_points_per_unit(),
        promo in arb_promo(),
        rounding in arb_rounding(),
    ) {
        let r = rule(ppu, rounding, promo);
        prop_assert_eq!(compute_points(amount, &r), compute_points(amount, &r));
    }

    /// Property: an earn never produces negative points.
    #[test]
    fn points_are_never_negative(
        amount in arb_amount(),
        ppu in arb_points_per_unit(),
        promo in arb_promo(),
        rounding in arb_rounding(),
    ) {
        let r = rule(ppu, rounding, promo);
        let points = compute_points(amount, &r).unwrap();
        prop_assert!(points >= 0);
    }

    /// Property: floor and nearest agree to within one point, and nearest is
    /// never below floor.
    #[test]
    fn nearest_is_floor_or_one_above(
        amount in arb_amount(),
        ppu in arb_points_per_unit(),
        promo in arb_promo(),
    ) {
        let floored = compute_points(amount, &rule(ppu, RoundingMode::Floor, promo)).unwrap();
        let nearest = compute_points(amount, &rule(ppu, RoundingMode::Nearest, promo)).unwrap();
        prop_assert!(nearest == floored || nearest == floored + 1);
    }

    /// Property: spending more never earns fewer points under the same rule.
    #[test]
    fn points_are_monotonic_in_amount(
        amount in arb_amount(),
        extra in 1i64..=1_000_000,
        ppu in arb_points_per_unit(),
        promo in arb_promo(),
        rounding in arb_rounding(),
    ) {
        let r = rule(ppu, rounding, promo);
        let base = compute_points(amount, &r).unwrap();
        let larger = compute_points(amount + Decimal::new(extra, 2), &r).unwrap();
        prop_assert!(larger >= base);
    }

    /// Property: with a unit rule and no promotion, floor earns exactly the
    /// whole currency units spent.
    #[test]
    fn unit_rule_floor_earns_whole_units(amount in arb_amount()) {
        let r = rule(Decimal::ONE, RoundingMode::Floor, Decimal::ONE);
        let points = compute_points(amount, &r).unwrap();
        prop_assert_eq!(Decimal::from(points), amount.trunc());
        prop_assert!(Decimal::from(points) <= amount);
        prop_assert!(Decimal::from(points + 1) > amount);
    }
}
