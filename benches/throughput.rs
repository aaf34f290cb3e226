use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use regula::{Applicability, DecisionEngine, DecisionTree, Facts, Node, Premise, Rule};

fn build_shared_engine() -> (Arc<DecisionEngine>, Facts) {
    let rules: Vec<Rule> = (0..200)
        .map(|i| {
            Rule::new(
                format!("r{i}"),
                Applicability::all([Premise::new("segment", "==", i64::from(i % 20))]),
                DecisionTree::from_node(Node::check(
                    format!("exposure <= {}", i * 10),
                    Node::leaf("within_limit"),
                    Node::leaf("breach"),
                )),
            )
        })
        .collect();
    let engine = DecisionEngine::default();
    let _ = engine.load(&rules);

    let facts = Facts::new().set("segment", 7_i64).set("exposure", 950_i64);
    (Arc::new(engine), facts)
}

fn bench_throughput(c: &mut Criterion) {
    let thread_counts = [1, 2, 4, 8];

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &thread_counts {
        let (engine, facts) = build_shared_engine();

        group.bench_function(format!("{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let per_thread = iters / threads as u64;
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let engine = Arc::clone(&engine);
                        let facts = facts.clone();
                        thread::spawn(move || {
                            let now = Utc::now();
                            let start = Instant::now();
                            for _ in 0..per_thread {
                                let _ = engine.decide(&facts, now);
                            }
                            start.elapsed()
                        })
                    })
                    .collect();

                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .max()
                    .unwrap_or(Duration::ZERO)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
