//! Worker-pool scheduler: persistent OS threads draining an MPMC work
//! queue, dispatching graph nodes by refcount countdown instead of walking
//! the topological order on every cycle.
//!
//! Threads are spawned once at construction (never per cycle), pinned to
//! physical cores with `core_affinity`, and shut down gracefully via a
//! sentinel message plus `join`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::{EngineError, EngineResult};
use crate::graph::Graph;
use crate::graph_node::{NodeId, PortBufferMap};
use crate::port::PortBuffer;
use crate::time_info::EngineProcessTimeInfo;

enum WorkItem {
    Node {
        graph: Arc<Graph>,
        node: NodeId,
        shared: Arc<CycleState>,
    },
    Shutdown,
}

/// Per-cycle shared state: each worker decrements a child's refcount after
/// finishing its own node; a refcount hitting zero releases that child to
/// the work queue. The last terminal node to finish posts `done`.
struct CycleState {
    time: EngineProcessTimeInfo,
    results: Mutex<HashMap<NodeId, PortBufferMap>>,
    refcounts: Mutex<HashMap<NodeId, usize>>,
    remaining_terminals: AtomicUsize,
    error: Mutex<Option<EngineError>>,
    done_tx: Sender<()>,
    work_tx: Sender<WorkItem>,
}

/// A pool of persistent realtime worker threads dispatching one graph
/// cycle at a time via refcount countdown.
pub struct Scheduler {
    work_tx: Sender<WorkItem>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(worker_count: usize) -> Self {
        let (work_tx, work_rx): (Sender<WorkItem>, Receiver<WorkItem>) = bounded(1024);
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();

        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count.max(1) {
            let rx = work_rx.clone();
            let core = core_ids.get(i % core_ids.len().max(1)).copied();
            let handle = std::thread::Builder::new()
                .name(format!("signalpath-worker-{i}"))
                .spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                    }
                    worker_loop(rx);
                })
                .expect("failed to spawn scheduler worker thread");
            handles.push(handle);
        }

        Self { work_tx, handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Run one cycle to completion on the worker pool and return each
    /// node's output buffers, keyed by node id.
    pub fn run_cycle(
        &self,
        graph: &Arc<Graph>,
        time: EngineProcessTimeInfo,
    ) -> EngineResult<HashMap<NodeId, PortBufferMap>> {
        if graph.node_count() == 0 {
            return Ok(HashMap::new());
        }

        let refcounts: HashMap<NodeId, usize> = graph
            .node_ids()
            .map(|id| (id, graph.parents.get(&id).map(|p| p.len()).unwrap_or(0)))
            .collect();

        let (done_tx, done_rx) = bounded(1);
        let shared = Arc::new(CycleState {
            time,
            results: Mutex::new(HashMap::new()),
            refcounts: Mutex::new(refcounts),
            remaining_terminals: AtomicUsize::new(graph.terminal_nodes.len().max(1)),
            error: Mutex::new(None),
            done_tx,
            work_tx: self.work_tx.clone(),
        });

        for &id in &graph.trigger_nodes {
            let _ = self.work_tx.send(WorkItem::Node {
                graph: graph.clone(),
                node: id,
                shared: shared.clone(),
            });
        }
        if graph.trigger_nodes.is_empty() {
            // No trigger nodes means every node has a parent, i.e. a cycle
            // the builder should have already rejected; defend anyway.
            return Err(EngineError::GraphCyclic {
                nodes: graph.node_ids().collect(),
            });
        }

        // `maybe_finish_terminal` posts exactly once, when the last terminal
        // node's countdown hits zero -- one send means one recv, regardless
        // of how many terminal nodes the graph has.
        let _ = done_rx.recv();

        if let Some(err) = shared.error.lock().expect("cycle error mutex poisoned").take() {
            return Err(err);
        }

        let results = shared.results.lock().expect("cycle results mutex poisoned").clone();
        Ok(results)
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.work_tx.send(WorkItem::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<WorkItem>) {
    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Shutdown => break,
            WorkItem::Node { graph, node, shared } => process_one_node(&graph, node, &shared),
        }
    }
}

fn process_one_node(graph: &Arc<Graph>, node_id: NodeId, shared: &Arc<CycleState>) {
    if shared.error.lock().expect("cycle error mutex poisoned").is_some() {
        maybe_finish_terminal(graph, node_id, shared);
        return;
    }

    let inputs = gather_inputs(graph, node_id, shared);
    let time = shared.time;

    let mut outputs = PortBufferMap::new();
    let outcome = graph.with_node_mut(node_id, |n| n.process(time, &inputs, &mut outputs));

    match outcome {
        Some(Ok(())) => {
            shared
                .results
                .lock()
                .expect("cycle results mutex poisoned")
                .insert(node_id, outputs);
            dispatch_children(graph, node_id, shared);
        }
        Some(Err(e)) => {
            let mut err_slot = shared.error.lock().expect("cycle error mutex poisoned");
            if err_slot.is_none() {
                *err_slot = Some(e);
            }
        }
        None => {}
    }

    maybe_finish_terminal(graph, node_id, shared);
}

fn gather_inputs(graph: &Arc<Graph>, node_id: NodeId, shared: &Arc<CycleState>) -> PortBufferMap {
    let mut inputs = PortBufferMap::new();
    let results = shared.results.lock().expect("cycle results mutex poisoned");
    for conn in graph.incoming_connections(node_id) {
        let Some(from_node) = graph.owning_node(conn.from) else { continue };
        let Some(src_outputs) = results.get(&from_node) else { continue };
        let Some(buf) = src_outputs.get(&conn.from) else { continue };
        let scaled = scale_buffer(buf, conn.multiplier);
        match inputs.get_mut(&conn.to) {
            Some(PortBuffer::Audio(existing)) | Some(PortBuffer::Cv(existing)) => {
                if let PortBuffer::Audio(add) | PortBuffer::Cv(add) = &scaled {
                    for (a, b) in existing.iter_mut().zip(add.iter()) {
                        *a += b;
                    }
                }
            }
            Some(PortBuffer::Control(existing)) => {
                if let PortBuffer::Control(add) = scaled {
                    *existing += add;
                }
            }
            Some(PortBuffer::Event(existing)) => {
                if let PortBuffer::Event(mut add) = scaled {
                    existing.append(&mut add);
                }
            }
            None => {
                inputs.insert(conn.to, scaled);
            }
        }
    }
    inputs
}

fn scale_buffer(buf: &PortBuffer, multiplier: f32) -> PortBuffer {
    match buf {
        PortBuffer::Audio(b) => PortBuffer::Audio(crate::port::PooledBuffer::plain(
            b.iter().map(|s| s * multiplier).collect(),
        )),
        PortBuffer::Cv(b) => PortBuffer::Cv(crate::port::PooledBuffer::plain(
            b.iter().map(|s| s * multiplier).collect(),
        )),
        PortBuffer::Control(v) => PortBuffer::Control(v * multiplier),
        PortBuffer::Event(events) => PortBuffer::Event(events.clone()),
    }
}

fn dispatch_children(graph: &Arc<Graph>, node_id: NodeId, shared: &Arc<CycleState>) {
    let Some(children) = graph.children.get(&node_id) else { return };
    let mut ready = Vec::new();
    {
        let mut refcounts = shared.refcounts.lock().expect("refcount mutex poisoned");
        for &child in children {
            if let Some(count) = refcounts.get_mut(&child) {
                *count -= 1;
                if *count == 0 {
                    ready.push(child);
                }
            }
        }
    }
    for child in ready {
        let _ = shared.work_tx.send(WorkItem::Node {
            graph: graph.clone(),
            node: child,
            shared: shared.clone(),
        });
    }
}

fn maybe_finish_terminal(graph: &Arc<Graph>, node_id: NodeId, shared: &Arc<CycleState>) {
    if graph.terminal_nodes.contains(&node_id) {
        let remaining = shared.remaining_terminals.fetch_sub(1, Ordering::AcqRel);
        if remaining == 1 {
            let _ = shared.done_tx.send(());
        }
    }
}
