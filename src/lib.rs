//! signalpath: a realtime-safe audio DSP processing-graph engine.
//!
//! The engine compiles a project's tracks, plugins, and sends into a
//! directed acyclic [`graph::Graph`], dispatches it cycle by cycle across a
//! pinned worker pool ([`scheduler`]), and hot-swaps rebuilt graphs in
//! without ever blocking the realtime callback ([`graph_builder`]). A
//! [`transport::Transport`] drives playback position and tempo; a
//! lock-free [`control_queue::ControlChangeQueue`] carries tempo/meter/loop
//! changes from non-realtime threads into the cycle-kickoff point; and
//! [`sample_playback::SamplePlaybackMixer`] mixes ad-hoc one-shot sounds
//! (metronome clicks, auditioning) directly into the monitor path outside
//! the graph proper.
//!
//! [`engine::Engine`] is the top-level orchestrator tying all of the above
//! to an [`backend::AudioBackend`].

pub mod backend;
pub mod config;
pub mod control_queue;
pub mod engine;
pub mod error;
pub mod graph;
pub mod graph_builder;
pub mod graph_node;
pub mod plugin_host;
pub mod port;
pub mod project_model;
pub mod sample_playback;
pub mod scheduler;
pub mod time_info;
pub mod transport;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
