use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use destroy_gate::core::session::OperationKind;
use destroy_gate::stages::plan::{analyze_structured, analyze_text, count_token};
use std::time::Duration;

fn rendered_plan(resources: usize) -> String {
    let mut out = String::new();
    for i in 0..resources {
        out.push_str(&format!(
            "  # module.net.google_compute_subnetwork.sub[{i}] will be destroyed\n  - resource \"google_compute_subnetwork\" \"sub\" {{\n      - project = \"proj-a\" -> null\n      - network = \"projects/proj-a/global/networks/main\" -> null\n    }}\n\n"
        ));
    }
    out.push_str(&format!(
        "Plan: 0 to add, 0 to change, {} to destroy.\n",
        resources
    ));
    out
}

fn structured_plan(resources: usize) -> serde_json::Value {
    let changes: Vec<serde_json::Value> = (0..resources)
        .map(|i| {
            serde_json::json!({
                "address": format!("google_compute_subnetwork.sub[{}]", i),
                "type": "google_compute_subnetwork",
                "change": {
                    "actions": ["delete"],
                    "before": {"project": "proj-a", "network": "projects/proj-a/global/networks/main"}
                }
            })
        })
        .collect();
    serde_json::json!({ "resource_changes": changes })
}

fn bench_plan_scan(c: &mut Criterion) {
    let deny = vec!["proj-b".to_string(), "proj-c".to_string(), "proj-d".to_string()];
    let mut group = c.benchmark_group("plan_scan");
    group.measurement_time(Duration::from_secs(5));

    for size in [10usize, 100, 1000] {
        let text = rendered_plan(size);
        group.bench_with_input(BenchmarkId::new("text", size), &text, |b, text| {
            b.iter(|| analyze_text(black_box(text), "proj-a", &deny));
        });
        let json = structured_plan(size);
        group.bench_with_input(BenchmarkId::new("structured", size), &json, |b, json| {
            b.iter(|| analyze_structured(black_box(json), OperationKind::Destroy, "proj-a", &deny));
        });
    }

    let big = rendered_plan(1000);
    group.bench_function("count_token_1000", |b| {
        b.iter(|| count_token(black_box(&big), "proj-a"));
    });
    group.finish();
}

criterion_group!(benches, bench_plan_scan);
criterion_main!(benches);
