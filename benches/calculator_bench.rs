//! Performance benchmarks for the points calculator.
//!
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;

use loyalty_ledger::domain::{compute_points, MerchantId, RoundingMode, RuleVersion, RuleVersionId};

fn make_rule(rounding: RoundingMode) -> RuleVersion {
    RuleVersion {
        id: RuleVersionId::new(),
        merchant_id: MerchantId::new(),
        version: 1,
        points_per_unit: Decimal::new(125, 2),
        rounding,
        promo_multiplier: Decimal::new(150, 2),
        effective_from: Utc::now(),
        created_at: Utc::now(),
    }
}

fn bench_compute_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_points");

    for (name, rounding) in [
        ("floor", RoundingMode::Floor),
        ("nearest", RoundingMode::Nearest),
    ] {
        let rule = make_rule(rounding);
        group.bench_with_input(BenchmarkId::from_parameter(name), &rule, |b, rule| {
            b.iter(|| compute_points(black_box(Decimal::new(12_99, 2)), black_box(rule)))
        });
    }

    group.finish();
}

fn bench_compute_points_batch(c: &mut Criterion) {
    let rule = make_rule(RoundingMode::Nearest);
    let amounts: Vec<Decimal> = (1..=1_000).map(|cents| Decimal::new(cents * 7, 2)).collect();

    let mut group = c.benchmark_group("compute_points_batch");
    group.throughput(Throughput::Elements(amounts.len() as u64));
    group.bench_function("1000_amounts", |b| {
        b.iter(|| {
            amounts
                .iter()
                .map(|amount| compute_points(black_box(*amount), &rule))
                .sum::<Option<i64>>()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_compute_points, bench_compute_points_batch);
criterion_main!(benches);
