use chrono::NaiveDate;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use recruit::allocation::{allocate, allocate_bounded, Weighting};
use recruit::config::AgeWindow;
use recruit::ingest::SourceRow;
use recruit::record::{Category, ParticipantRecord};
use recruit::sampler::fill_quotas;
use recruit::trimmer::trim;

fn weights() -> BTreeMap<Category, f64> {
    Category::ALL
        .iter()
        .zip([0.3, 0.2, 0.2, 0.1, 0.1, 0.1])
        .map(|(c, w)| (*c, w))
        .collect()
}

fn population(n: usize) -> Vec<ParticipantRecord> {
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let window = AgeWindow { min: 2.0, max: 5.0 };
    (0..n)
        .filter_map(|i| {
            SourceRow {
                maternal_id: format!("M{}", i / 2),
                offspring_id: format!("C{}", i),
                date_of_birth: "2021-06-01".to_string(),
                model_pctile: Some(format!("{}", i % 100)),
                ..Default::default()
            }
            .into_record("MGB", today, window, i as u64 + 1)
            .ok()
        })
        .collect()
}

fn bench_allocate(c: &mut Criterion) {
    let weights = weights();
    let yields: BTreeMap<Category, f64> = Category::ALL.iter().map(|c| (*c, 0.05)).collect();
    c.bench_function("allocate_yield_adjusted", |b| {
        b.iter(|| allocate(black_box(80), &weights, Weighting::YieldAdjusted(&yields)))
    });
}

fn bench_allocate_bounded(c: &mut Criterion) {
    let weights = weights();
    let capacity: BTreeMap<Category, usize> = Category::ALL
        .iter()
        .zip([5, 400, 30, 900, 2, 700])
        .map(|(c, n)| (*c, n))
        .collect();
    c.bench_function("allocate_bounded", |b| {
        b.iter(|| allocate_bounded(black_box(1000), &weights, &capacity))
    });
}

fn bench_fill_quotas(c: &mut Criterion) {
    let records = population(10_000);
    let quotas = allocate(80, &weights(), Weighting::Direct);
    let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    c.bench_function("fill_quotas_10k", |b| {
        b.iter(|| {
            let mut records = records.clone();
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            fill_quotas(&mut records, black_box(&quotas), date, &mut rng)
        })
    });
}

fn bench_trim(c: &mut Criterion) {
    let records = population(10_000);
    let weights = weights();
    c.bench_function("trim_10k_to_1k", |b| {
        b.iter(|| {
            let mut records = records.clone();
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            trim(&mut records, black_box(1000), &weights, &mut rng)
        })
    });
}

criterion_group!(
    benches,
    bench_allocate,
    bench_allocate_bounded,
    bench_fill_quotas,
    bench_trim
);
criterion_main!(benches);
