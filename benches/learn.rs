use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, SamplingMode};
use separator::{build_learner, tasks::trace_dsl, SolverOptions, Task, Z3Solver};

const UNTIL: &str = "\
1,0;0,1::0
0,0;1,0;0,1;0,0
0,1;0,0::1
0,1;1,0;1,0;1,0::2
---
0,0::0
1,0;0,0;0,0;0,0::1
0,0;0,0;0,1;0,0::3
---
---
[4]
";

const GRAPH: &str = r#"{
    "sorts": ["Node"],
    "relations": [{"name": "edge", "signature": ["Node", "Node"]}],
    "positiveExamples": [{
        "constants": [{"name": "a", "sort": "Node"}, {"name": "b", "sort": "Node"}],
        "relationFacts": {"edge": [["a", "b"], ["b", "a"]]}
    }],
    "negativeExamples": [{
        "constants": [{"name": "c", "sort": "Node"}, {"name": "d", "sort": "Node"}],
        "relationFacts": {"edge": [["c", "d"]]}
    }],
    "maxNodes": 5
}"#;

fn run(task: Task) {
    let finder = Z3Solver::initialize(&SolverOptions::default());
    let learner = build_learner(task, &finder).unwrap();
    _ = learner.learn(None, 1).unwrap();
}

fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("learn");
    group.sampling_mode(SamplingMode::Flat);
    group.bench_function("ltl_until", |b| {
        b.iter(|| run(trace_dsl::parse(UNTIL).unwrap().into()))
    });
    group.bench_function("fol_symmetric_edges", |b| {
        b.iter(|| run(separator::tasks::json::parse(GRAPH).unwrap().into()))
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_secs(5))
        .measurement_time(Duration::from_secs(30));
    targets = bench,
}
criterion_main!(benches);
