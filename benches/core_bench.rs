//! Benchmarks for rivet core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rivet::audit::hasher;
use rivet::core::graph::{ActionGraph, TemplateContext};
use rivet::core::ledger::Ledger;
use rivet::core::parser;
use rivet::core::resolver;
use rivet::core::types::{ActionDecl, ArgSpec};

const ZAANET: &str = r#"
version: "1.0"
name: ZaaNetDeploymentModule
params:
  treasury: "0x26a1f5c7d1b0e3a4c9f8e2d7b6a5c4d3e2f1a0b9"
  fee: 5
actions:
  storage: { contract: ZaaNetStorage }
  admin: { contract: ZaaNetAdmin, args: [{ ref: storage }, "{{params.treasury}}", "{{params.fee}}"] }
  network: { contract: ZaaNetNetwork, args: [{ ref: storage }] }
  payment: { contract: ZaaNetPayment, args: [{ ref: network }, { ref: storage }, { ref: admin }] }
  authorizeNetworkCaller: { call: setAllowedCaller, on: storage, args: [{ ref: network }, true] }
  authorizePaymentCaller: { call: setAllowedCaller, on: storage, args: [{ ref: payment }, true], after: [authorizeNetworkCaller] }
results: [storage, admin, network, payment]
"#;

/// A chain of n instantiations, each taking the previous one as argument.
fn chain_graph(n: usize) -> ActionGraph {
    let steps = (0..n).map(|i| {
        let args = if i == 0 {
            vec![]
        } else {
            vec![ArgSpec::Ref {
                reference: format!("c{:04}", i - 1),
            }]
        };
        (
            format!("c{i:04}"),
            ActionDecl {
                contract: Some(format!("C{i}")),
                args,
                ..ActionDecl::default()
            },
        )
    });
    let ctx = TemplateContext::new(&Default::default(), None);
    ActionGraph::from_steps("bench", steps, &ctx).unwrap()
}

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 256, 1024, 4096] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_declaration_parse(c: &mut Criterion) {
    c.bench_function("declaration_parse_validate", |b| {
        b.iter(|| {
            let decl = parser::parse_declaration(black_box(ZAANET)).unwrap();
            black_box(parser::validate_declaration(&decl));
        });
    });
}

fn bench_graph_build(c: &mut Criterion) {
    let decl = parser::parse_declaration(ZAANET).unwrap();
    c.bench_function("graph_build", |b| {
        b.iter(|| black_box(ActionGraph::build(black_box(&decl), None).unwrap()));
    });
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for n in [10, 100, 1000] {
        let graph = chain_graph(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, graph| {
            b.iter(|| black_box(resolver::build_execution_order(black_box(graph)).unwrap()));
        });
    }
    group.finish();
}

fn bench_graph_fingerprint(c: &mut Criterion) {
    let graph = chain_graph(100);
    c.bench_function("graph_fingerprint_100", |b| {
        b.iter(|| black_box(hasher::graph_fingerprint(black_box(&graph))));
    });
}

fn bench_ledger_transition(c: &mut Criterion) {
    let ledger = Ledger::open_in_memory().unwrap();
    let result = serde_json::json!("0x5fbdb2315678afecb367f032d93f642f64180aa3");
    let mut i = 0u64;
    c.bench_function("ledger_in_flight_completed", |b| {
        b.iter(|| {
            let action = format!("a{i}");
            i += 1;
            ledger.mark_in_flight("bench", &action, "f", "x").unwrap();
            black_box(ledger.mark_completed("bench", &action, "x", &result, "0xt").unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_declaration_parse,
    bench_graph_build,
    bench_resolve,
    bench_graph_fingerprint,
    bench_ledger_transition
);
criterion_main!(benches);
