//! Benchmarks for topology ordering.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stackflow::config::EnvironmentConfig;
use stackflow::testing::StaticUnit;
use stackflow::topology::TopologyGraph;
use stackflow::units::mensaje_topology;
use std::sync::Arc;

// Layers of `width` units, each depending on every unit of the layer below.
fn layered(layers: usize, width: usize) -> TopologyGraph {
    let mut graph = TopologyGraph::new("bench");
    for layer in 0..layers {
        for i in 0..width {
            let name = format!("Unit-{layer}-{i}");
            graph.add_unit(Arc::new(StaticUnit::new(name.clone()))).unwrap();
            if layer > 0 {
                for j in 0..width {
                    graph.add_dependency(&name, &format!("Unit-{}-{j}", layer - 1)).unwrap();
                }
            }
        }
    }
    graph
}

fn topology_benchmark(c: &mut Criterion) {
    let mensaje = mensaje_topology(&EnvironmentConfig::default()).unwrap();
    c.bench_function("mensaje_validate", |b| b.iter(|| black_box(mensaje.validate().unwrap())));

    let mut group = c.benchmark_group("resolve_order");
    for (layers, width) in [(4, 4), (10, 10), (20, 10)] {
        let graph = layered(layers, width);
        group.bench_with_input(BenchmarkId::from_parameter(layers * width), &graph, |b, graph| {
            b.iter(|| black_box(graph.resolve_order().unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, topology_benchmark);
criterion_main!(benches);
