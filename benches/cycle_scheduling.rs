//! Benchmarks for graph build and cycle dispatch, isolating scheduler
//! overhead from DSP cost using trivial passthrough/fader nodes.
//!
//! Run with: cargo bench --bench cycle_scheduling

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use signalpath::config::{FaderCurve, PanLaw};
use signalpath::graph::build_graph;
use signalpath::graph_builder::GraphBuilder;
use signalpath::graph_node::{FaderNode, GraphNode, NodeId, NodePayload, TrackProcessor};
use signalpath::port::{Connection, Port, PortDirection, PortId};
use signalpath::scheduler::Scheduler;
use signalpath::time_info::EngineProcessTimeInfo;

const BLOCK_SIZES: &[usize] = &[64, 128, 256, 512, 1024];

fn fader(id: u64, in_port: u64, out_port: u64, block_len: usize) -> GraphNode {
    GraphNode {
        id: NodeId(id),
        name: format!("fader{id}"),
        ports: vec![
            Port::new_audio(PortId(in_port), "in", PortDirection::Input),
            Port::new_audio(PortId(out_port), "out", PortDirection::Output),
        ],
        playback_latency: 0,
        route_playback_latency: 0,
        payload: NodePayload::Fader(FaderNode {
            block_len,
            gain_db: -3.0,
            curve: FaderCurve::Cubic,
            pan: 0.0,
            pan_law: PanLaw::SquareRoot,
            muted: false,
        }),
    }
}

fn track(id: u64, out_port: u64, block_len: usize) -> GraphNode {
    GraphNode {
        id: NodeId(id),
        name: format!("track{id}"),
        ports: vec![Port::new_audio(PortId(out_port), "out", PortDirection::Output)],
        playback_latency: 0,
        route_playback_latency: 0,
        payload: NodePayload::TrackProcessor(TrackProcessor {
            block_len,
            region: None,
            pending_events: Vec::new(),
        }),
    }
}

/// A single source feeding a linear chain of `n` faders.
fn linear_chain(n: usize, block_len: usize) -> (Vec<GraphNode>, Vec<Connection>) {
    let mut nodes = vec![track(1, 1, block_len)];
    let mut connections = Vec::new();
    let mut last_out = PortId(1);
    let mut node_id = 2u64;
    let mut port_id = 2u64;
    for _ in 0..n {
        let in_id = PortId(port_id);
        let out_id = PortId(port_id + 1);
        nodes.push(fader(node_id, in_id.0, out_id.0, block_len));
        connections.push(Connection::new(last_out, in_id));
        last_out = out_id;
        node_id += 1;
        port_id += 2;
    }
    (nodes, connections)
}

/// Two independent track chains converging on a shared fader, the same
/// fan-in shape as the two-track stereo sum scenario.
fn diamond(block_len: usize) -> (Vec<GraphNode>, Vec<Connection>) {
    let nodes = vec![
        track(1, 1, block_len),
        track(2, 2, block_len),
        fader(3, 3, 4, block_len),
    ];
    let connections = vec![Connection::new(PortId(1), PortId(3)), Connection::new(PortId(2), PortId(3))];
    (nodes, connections)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/build");

    group.bench_function("linear_5", |b| {
        b.iter(|| {
            let (nodes, connections) = linear_chain(5, 256);
            black_box(build_graph(0, nodes, connections).unwrap());
        });
    });

    group.bench_function("linear_20", |b| {
        b.iter(|| {
            let (nodes, connections) = linear_chain(20, 256);
            black_box(build_graph(0, nodes, connections).unwrap());
        });
    });

    group.bench_function("diamond", |b| {
        b.iter(|| {
            let (nodes, connections) = diamond(256);
            black_box(build_graph(0, nodes, connections).unwrap());
        });
    });

    group.finish();
}

fn bench_run_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/run_cycle");
    let scheduler = Scheduler::new(4);

    for &block_len in BLOCK_SIZES {
        let (nodes, connections) = linear_chain(5, block_len);
        let mut builder = GraphBuilder::new();
        for n in nodes {
            builder.add_node(n);
        }
        for conn in connections {
            builder.connect(conn);
        }
        let graph = std::sync::Arc::new(builder.build(0).unwrap());
        let time = EngineProcessTimeInfo::new(0, 0, block_len);

        group.bench_with_input(BenchmarkId::new("linear_5", block_len), &block_len, |b, _| {
            b.iter(|| {
                black_box(scheduler.run_cycle(&graph, time).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_run_cycle);
criterion_main!(benches);
