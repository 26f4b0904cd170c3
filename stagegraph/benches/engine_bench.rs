//! Benchmarks for engine execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use stagegraph::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

fn linear_graph(len: usize) -> CompiledGraph {
    let names: Vec<String> = (0..len).map(|i| format!("s{i}")).collect();
    let mut builder = GraphBuilder::new("linear").start(names[0].clone());
    for name in &names {
        let stage = FnStage::new(name.clone(), |input: &StageInput| {
            StageOutput::ok_value(input.stage_name(), json!(true))
        });
        builder = builder.stage(name.clone(), Arc::new(stage));
    }
    for pair in names.windows(2) {
        builder = builder.edge(pair[0].clone(), pair[1].clone());
    }
    builder.terminal(names[len - 1].clone()).build().unwrap()
}

fn fan_out_graph(width: usize) -> CompiledGraph {
    let children: Vec<String> = (0..width).map(|i| format!("child{i}")).collect();
    let dispatch_to = children.clone();
    let dispatcher = move |_: &State| -> Vec<FanOutTarget> {
        dispatch_to
            .iter()
            .map(|name| FanOutTarget::new(name.clone(), Value::Null))
            .collect()
    };

    let mut builder = GraphBuilder::new("fanout")
        .stage("plan", Arc::new(NoOpStage::new("plan")))
        .start("plan");
    for name in &children {
        let stage = FnStage::new(name.clone(), |input: &StageInput| {
            StageOutput::ok_value("out", json!(input.stage_name()))
        });
        builder = builder.stage(name.clone(), Arc::new(stage));
    }
    builder
        .stage(
            "join",
            Arc::new(FnStage::new("join", |input: &StageInput| {
                let count = input.fan_in().map_or(0, |f| f.results.len());
                StageOutput::ok_value("joined", json!(count))
            })),
        )
        .fan_out("plan", FanOutEdge::new(dispatcher, children, "join"))
        .terminal("join")
        .build()
        .unwrap()
}

fn engine_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ids = AtomicU64::new(0);

    let linear = Engine::in_memory(linear_graph(10));
    c.bench_function("linear_10_stages", |b| {
        b.iter(|| {
            let id = format!("bench-{}", ids.fetch_add(1, Ordering::Relaxed));
            black_box(rt.block_on(linear.start(id, State::new())).unwrap())
        });
    });

    let fan_out = Engine::in_memory(fan_out_graph(16));
    c.bench_function("fan_out_16_children", |b| {
        b.iter(|| {
            let id = format!("bench-{}", ids.fetch_add(1, Ordering::Relaxed));
            black_box(rt.block_on(fan_out.start(id, State::new())).unwrap())
        });
    });
}

criterion_group!(benches, engine_benchmark);
criterion_main!(benches);
