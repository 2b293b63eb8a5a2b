//! Minimal project-model collaborator: the graph builder's only window into
//! "what tracks/plugins exist." Full project serialization, the arranger,
//! and the track list UI are out of scope; this module exists only to give
//! `GraphBuilder` something concrete to compile a graph from.

use crate::config::EngineConfig;
use crate::graph_builder::GraphBuilder;
use crate::graph_node::{
    ChannelSendNode, FaderNode, GraphNode, ModulatorMacroNode, NodeId, NodePayload, TrackProcessor,
};
use crate::plugin_host::{HostedPlugin, PassthroughPlugin};
use crate::port::{Connection, ControlRange, Port, PortDirection, PortId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Midi,
    Instrument,
    Chord,
    Master,
}

pub struct TrackSpec {
    pub name: String,
    pub kind: TrackKind,
    pub plugin: Option<Box<str>>,
    pub send_to_master: bool,
}

/// A project's track list plus the fixed master bus, in declaration order.
pub struct ProjectModel {
    pub tracks: Vec<TrackSpec>,
}

impl ProjectModel {
    pub fn new() -> Self {
        Self { tracks: Vec::new() }
    }

    pub fn add_track(&mut self, spec: TrackSpec) {
        self.tracks.push(spec);
    }

    /// Correct linear search for the master track, in contrast to the
    /// original's post-increment-while-searching hazard. See DESIGN.md.
    pub fn contains_master_track(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Master)
    }

    pub fn contains_chord_track(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Chord)
    }
}

impl Default for ProjectModel {
    fn default() -> Self {
        Self::new()
    }
}

fn next_id(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter += 1;
    id
}

/// Compiles a `ProjectModel` into a `GraphBuilder`: one track-processor ->
/// optional plugin -> prefader -> fader chain per track, each track's fader
/// optionally sent to a synthesized master bus.
pub fn compile_project(project: &ProjectModel, config: &EngineConfig) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    let mut port_id = 1u64;
    let mut node_id = 1u64;
    let block_len = config.block_len;

    let master_fader_id = if project.contains_master_track() {
        let in_id = PortId(next_id(&mut port_id));
        let out_id = PortId(next_id(&mut port_id));
        let id = NodeId(next_id(&mut node_id));
        builder.add_node(GraphNode {
            id,
            name: "master".to_string(),
            ports: vec![
                Port::new_audio(in_id, "in", PortDirection::Input),
                Port::new_audio(out_id, "out", PortDirection::Output),
            ],
            playback_latency: 0,
            route_playback_latency: 0,
            payload: NodePayload::MonitorFader(FaderNode {
                block_len,
                gain_db: 0.0,
                curve: config.fader_curve,
                pan: 0.0,
                pan_law: config.pan_law,
                muted: false,
            }),
        });
        Some((id, in_id))
    } else {
        None
    };

    for spec in &project.tracks {
        if spec.kind == TrackKind::Master {
            continue;
        }
        let proc_out = PortId(next_id(&mut port_id));
        let proc_events = PortId(next_id(&mut port_id));
        let proc_id = NodeId(next_id(&mut node_id));
        builder.add_node(GraphNode {
            id: proc_id,
            name: format!("{}:processor", spec.name),
            ports: vec![
                Port::new_audio(proc_out, "out", PortDirection::Output),
                Port::new_event(proc_events, "events", PortDirection::Output),
            ],
            playback_latency: 0,
            route_playback_latency: 0,
            payload: NodePayload::TrackProcessor(TrackProcessor {
                block_len,
                region: None,
                pending_events: Vec::new(),
            }),
        });

        let mut last_out = proc_out;

        if let Some(plugin_name) = &spec.plugin {
            let plugin_in = PortId(next_id(&mut port_id));
            let plugin_out = PortId(next_id(&mut port_id));
            let plugin_id = NodeId(next_id(&mut node_id));
            let plugin: Box<dyn HostedPlugin> = Box::new(PassthroughPlugin::new(plugin_name.to_string()));
            let plugin_latency = plugin.latency_samples();
            builder.add_node(GraphNode {
                id: plugin_id,
                name: format!("{}:plugin", spec.name),
                ports: vec![
                    Port::new_audio(plugin_in, "in", PortDirection::Input),
                    Port::new_audio(plugin_out, "out", PortDirection::Output),
                ],
                playback_latency: plugin_latency,
                route_playback_latency: 0,
                payload: NodePayload::Plugin(crate::graph_node::PluginNode::new(plugin, block_len)),
            });
            builder.connect(Connection::new(last_out, plugin_in));
            last_out = plugin_out;
        }

        let fader_in = PortId(next_id(&mut port_id));
        let fader_out = PortId(next_id(&mut port_id));
        let fader_id = NodeId(next_id(&mut node_id));
        builder.add_node(GraphNode {
            id: fader_id,
            name: format!("{}:fader", spec.name),
            ports: vec![
                Port::new_audio(fader_in, "in", PortDirection::Input),
                Port::new_audio(fader_out, "out", PortDirection::Output),
            ],
            playback_latency: 0,
            route_playback_latency: 0,
            payload: NodePayload::Fader(FaderNode {
                block_len,
                gain_db: 0.0,
                curve: config.fader_curve,
                pan: 0.0,
                pan_law: config.pan_law,
                muted: false,
            }),
        });
        builder.connect(Connection::new(last_out, fader_in));

        if spec.send_to_master {
            if let Some((_, master_in)) = master_fader_id {
                builder.connect(Connection::new(fader_out, master_in));
            }
        }
    }

    builder
}

/// Builds a standalone MODULATOR_MACRO node wired to `n` CV outputs, for
/// callers assembling macro-control routing outside the per-track chain.
pub fn build_modulator_macro(port_id: &mut u64, node_id: &mut u64, n_outputs: usize) -> GraphNode {
    let cv_in = PortId(next_id(port_id));
    let mut ports = vec![crate::port::Port::new_cv(cv_in, "cv_in", PortDirection::Input)];
    for i in 0..n_outputs {
        ports.push(crate::port::Port::new_cv(
            PortId(next_id(port_id)),
            format!("cv_out_{i}"),
            PortDirection::Output,
        ));
    }
    GraphNode {
        id: NodeId(next_id(node_id)),
        name: "modulator_macro".to_string(),
        ports,
        playback_latency: 0,
        route_playback_latency: 0,
        payload: NodePayload::ModulatorMacro(ModulatorMacroNode {
            macro_value: 0.5,
            macro_range: ControlRange {
                min: 0.0,
                max: 1.0,
                default: 0.5,
            },
        }),
    }
}

/// Builds a standalone CHANNEL_SEND node.
pub fn build_channel_send(port_id: &mut u64, node_id: &mut u64, block_len: usize, send_gain: f32) -> GraphNode {
    let in_id = PortId(next_id(port_id));
    let out_id = PortId(next_id(port_id));
    GraphNode {
        id: NodeId(next_id(node_id)),
        name: "channel_send".to_string(),
        ports: vec![
            Port::new_audio(in_id, "in", PortDirection::Input),
            Port::new_audio(out_id, "send_out", PortDirection::Output),
        ],
        playback_latency: 0,
        route_playback_latency: 0,
        payload: NodePayload::ChannelSend(ChannelSendNode {
            block_len,
            send_gain,
            enabled: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_track_into_a_buildable_graph() {
        let mut project = ProjectModel::new();
        project.add_track(TrackSpec {
            name: "drums".to_string(),
            kind: TrackKind::Audio,
            plugin: None,
            send_to_master: true,
        });
        project.add_track(TrackSpec {
            name: "master".to_string(),
            kind: TrackKind::Master,
            plugin: None,
            send_to_master: false,
        });
        let config = EngineConfig::default();
        let builder = compile_project(&project, &config);
        let graph = builder.build(0).expect("compiled project should build");
        assert!(graph.node_count() >= 3);
    }

    #[test]
    fn master_track_search_is_a_correct_linear_scan() {
        let mut project = ProjectModel::new();
        assert!(!project.contains_master_track());
        project.add_track(TrackSpec {
            name: "master".to_string(),
            kind: TrackKind::Master,
            plugin: None,
            send_to_master: false,
        });
        assert!(project.contains_master_track());
    }
}
