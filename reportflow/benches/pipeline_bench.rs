//! Benchmarks for the hot paths of a report run.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reportflow::parsing::extract_json;
use reportflow::pipeline::MergePolicy;
use reportflow::quality::{render_sections, QualityGate, ValueConsistencyValidator};
use reportflow::testing::{sample_store, sections_json, standard_sections};
use serde_json::json;

fn quality_benchmark(c: &mut Criterion) {
    let store = sample_store();
    let sections = standard_sections(&store);
    let raw = render_sections(&sections);

    let validator = ValueConsistencyValidator::default();
    c.bench_function("consistency_check", |b| {
        b.iter(|| black_box(validator.check(&store, &sections)));
    });

    let gate = QualityGate::default();
    c.bench_function("gate_evaluate", |b| {
        b.iter(|| black_box(gate.evaluate(&store, &sections, &raw)));
    });
}

fn parsing_benchmark(c: &mut Criterion) {
    let store = sample_store();
    let reply = format!(
        "Here is the report:\n```json\n{}\n```\nLet me know if you need changes.",
        sections_json(&standard_sections(&store))
    );
    c.bench_function("extract_fenced_json", |b| {
        b.iter(|| black_box(extract_json(&reply)));
    });

    let partials: Vec<_> = (0..8)
        .map(|n| {
            json!({"periods": [
                {"period": format!("FY{}", 2018 + n % 4), "revenue": 400_000 + n * 10_000},
                {"period": format!("{}", 2019 + n % 4), "revenue": 410_000 + n * 10_000, "net_income": 40_000}
            ]})
        })
        .collect();
    let policy = MergePolicy::financial_statements();
    c.bench_function("merge_financial_statements", |b| {
        b.iter(|| black_box(policy.merge(&partials)));
    });
}

criterion_group!(benches, quality_benchmark, parsing_benchmark);
criterion_main!(benches);
