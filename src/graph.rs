//! The built, immutable-per-cycle processing graph: nodes, edges, and the
//! precomputed dispatch order the scheduler drives.

use std::collections::HashMap;
use std::sync::Mutex;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::algo::toposort;
use petgraph::Direction;

use crate::error::{BuildError, BuildResult};
use crate::graph_node::{GraphNode, NodeId};
use crate::port::{Connection, PortId};

/// A built graph, ready for repeated per-cycle processing. One exclusive
/// writer (the builder) produces a new `Graph` and swaps it in via
/// `ArcSwap`; many readers (scheduler workers) share one `Arc<Graph>` for
/// the duration of a cycle. Each node is individually mutex-guarded so
/// workers can mutate node-local state (plugin instances, filter memory)
/// through a shared `&Graph` without any node ever being touched by two
/// threads at once -- the refcount-gated dispatch in the scheduler
/// guarantees a node's `process` runs exactly once per cycle.
pub struct Graph {
    pub generation: u64,
    nodes: HashMap<NodeId, Mutex<GraphNode>>,
    connections: Vec<Connection>,
    /// Port id -> owning node id, built once at graph construction.
    port_owner: HashMap<PortId, NodeId>,
    /// Execution order: a topological ordering of node ids such that every
    /// node appears after all of its parents.
    pub execution_order: Vec<NodeId>,
    /// Nodes with in-degree zero: the scheduler's initial trigger set.
    pub trigger_nodes: Vec<NodeId>,
    /// Nodes with out-degree zero: post the cycle-completion semaphore.
    pub terminal_nodes: Vec<NodeId>,
    /// Adjacency: node -> direct children, computed once at build time.
    pub children: HashMap<NodeId, Vec<NodeId>>,
    /// Adjacency: node -> direct parents.
    pub parents: HashMap<NodeId, Vec<NodeId>>,
    pub max_route_playback_latency: u32,
}

impl Graph {
    /// Run `f` with shared access to a node's state.
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&GraphNode) -> R) -> Option<R> {
        self.nodes.get(&id).map(|m| f(&m.lock().expect("node mutex poisoned")))
    }

    /// Run `f` with exclusive access to a node's state. Only ever called
    /// once per node per cycle by the scheduler.
    pub fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut GraphNode) -> R) -> Option<R> {
        self.nodes
            .get(&id)
            .map(|m| f(&mut m.lock().expect("node mutex poisoned")))
    }

    pub fn node_name(&self, id: NodeId) -> Option<String> {
        self.with_node(id, |n| n.name.clone())
    }

    pub fn route_playback_latency(&self, id: NodeId) -> u32 {
        self.with_node(id, |n| n.route_playback_latency).unwrap_or(0)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn owning_node(&self, port: PortId) -> Option<NodeId> {
        self.port_owner.get(&port).copied()
    }

    /// Connections terminating at `node`, in stable declaration order.
    pub fn incoming_connections(&self, node: NodeId) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|c| self.port_owner.get(&c.to) == Some(&node) && c.enabled)
            .collect()
    }

    pub fn global_offset(&self, node: NodeId) -> i64 {
        self.max_route_playback_latency as i64 - self.route_playback_latency(node) as i64
    }
}

/// Builds a `Graph` from a set of nodes and connections: validates port
/// kind compatibility, detects cycles, computes topological order and
/// per-route playback latency.
pub fn build_graph(
    generation: u64,
    nodes: Vec<GraphNode>,
    connections: Vec<Connection>,
) -> BuildResult<Graph> {
    let mut port_owner = HashMap::new();
    for node in &nodes {
        for port in &node.ports {
            port_owner.insert(port.id, node.id);
        }
    }

    for c in &connections {
        let from_port = nodes
            .iter()
            .flat_map(|n| n.ports.iter())
            .find(|p| p.id == c.from)
            .ok_or(BuildError::PortNotFound(c.from))?;
        let to_port = nodes
            .iter()
            .flat_map(|n| n.ports.iter())
            .find(|p| p.id == c.to)
            .ok_or(BuildError::PortNotFound(c.to))?;
        if from_port.kind != to_port.kind {
            return Err(BuildError::KindMismatch {
                from: c.from,
                to: c.to,
                from_kind: from_port.kind,
                to_kind: to_port.kind,
            });
        }
    }

    let mut graph = DiGraph::<NodeId, ()>::new();
    let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();
    for node in &nodes {
        index_of.insert(node.id, graph.add_node(node.id));
    }
    for c in &connections {
        // Disabled connections are excluded from signal summation
        // (`incoming_connections`/`gather_inputs` filter on `enabled`) but
        // still participate in topology and latency bookkeeping, so the
        // edge is added unconditionally here.
        let from_node = *port_owner.get(&c.from).ok_or(BuildError::PortNotFound(c.from))?;
        let to_node = *port_owner.get(&c.to).ok_or(BuildError::PortNotFound(c.to))?;
        if from_node == to_node {
            continue;
        }
        graph.add_edge(index_of[&from_node], index_of[&to_node], ());
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let stuck: Vec<NodeId> = graph.node_indices().map(|idx| graph[idx]).collect();
        let _ = cycle;
        BuildError::Cyclic(stuck)
    })?;
    let execution_order: Vec<NodeId> = order.into_iter().map(|idx| graph[idx]).collect();

    let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut parents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in &nodes {
        children.entry(node.id).or_default();
        parents.entry(node.id).or_default();
    }
    for edge in graph.edge_indices() {
        let (a, b) = graph.edge_endpoints(edge).unwrap();
        children.entry(graph[a]).or_default().push(graph[b]);
        parents.entry(graph[b]).or_default().push(graph[a]);
    }
    for v in children.values_mut() {
        v.sort_by_key(|id| id.0);
    }
    for v in parents.values_mut() {
        v.sort_by_key(|id| id.0);
    }

    let trigger_nodes: Vec<NodeId> = nodes
        .iter()
        .filter(|n| graph.neighbors_directed(index_of[&n.id], Direction::Incoming).count() == 0)
        .map(|n| n.id)
        .collect();
    let terminal_nodes: Vec<NodeId> = nodes
        .iter()
        .filter(|n| graph.neighbors_directed(index_of[&n.id], Direction::Outgoing).count() == 0)
        .map(|n| n.id)
        .collect();

    let mut nodes_map: HashMap<NodeId, GraphNode> = nodes.into_iter().map(|n| (n.id, n)).collect();

    // Longest-path route-latency pass, in topological order, with
    // deterministic tie-breaking on the smaller node id (already guaranteed
    // by the sorted parent adjacency above).
    let mut route_latency: HashMap<NodeId, u32> = HashMap::new();
    for &id in &execution_order {
        let parent_max = parents
            .get(&id)
            .into_iter()
            .flatten()
            .map(|p| *route_latency.get(p).unwrap_or(&0))
            .max()
            .unwrap_or(0);
        let intrinsic = nodes_map.get(&id).map(|n| n.playback_latency).unwrap_or(0);
        route_latency.insert(id, parent_max + intrinsic);
    }
    let max_route_playback_latency = route_latency.values().copied().max().unwrap_or(0);
    for (id, node) in nodes_map.iter_mut() {
        node.route_playback_latency = *route_latency.get(id).unwrap_or(&0);
    }
    let nodes_map: HashMap<NodeId, Mutex<GraphNode>> =
        nodes_map.into_iter().map(|(id, n)| (id, Mutex::new(n))).collect();

    Ok(Graph {
        generation,
        nodes: nodes_map,
        connections,
        port_owner,
        execution_order,
        trigger_nodes,
        terminal_nodes,
        children,
        parents,
        max_route_playback_latency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_node::{NodePayload, TrackProcessor};
    use crate::port::PortDirection;

    fn node(id: u64, in_port: Option<u64>, out_port: Option<u64>, latency: u32) -> GraphNode {
        let mut ports = Vec::new();
        if let Some(p) = in_port {
            ports.push(crate::port::Port::new_audio(PortId(p), "in", PortDirection::Input));
        }
        if let Some(p) = out_port {
            ports.push(crate::port::Port::new_audio(PortId(p), "out", PortDirection::Output));
        }
        GraphNode {
            id: NodeId(id),
            name: format!("node{id}"),
            ports,
            playback_latency: latency,
            route_playback_latency: 0,
            payload: NodePayload::TrackProcessor(TrackProcessor {
                block_len: 64,
                region: None,
                pending_events: Vec::new(),
            }),
        }
    }

    #[test]
    fn linear_chain_topo_sorts_and_computes_latency() {
        let nodes = vec![node(1, None, Some(1), 5), node(2, Some(2), Some(3), 3)];
        let connections = vec![Connection::new(PortId(1), PortId(2))];
        let g = build_graph(0, nodes, connections).expect("graph should build");
        assert_eq!(g.execution_order, vec![NodeId(1), NodeId(2)]);
        assert_eq!(g.max_route_playback_latency, 8);
        assert_eq!(g.trigger_nodes, vec![NodeId(1)]);
        assert_eq!(g.terminal_nodes, vec![NodeId(2)]);
    }

    #[test]
    fn cycle_is_rejected() {
        let nodes = vec![node(1, Some(1), Some(2), 0), node(2, Some(2), Some(1), 0)];
        let connections = vec![Connection::new(PortId(2), PortId(1)), Connection::new(PortId(1), PortId(2))];
        let result = build_graph(0, nodes, connections);
        assert!(matches!(result, Err(BuildError::Cyclic(_))));
    }
}
