//! Graph node: the unit of work the scheduler dispatches. Each node owns a
//! fixed set of typed ports and a payload that knows how to turn its inputs
//! into its outputs for one block.

use std::collections::{HashMap, VecDeque};

use crate::config::{FaderCurve, PanLaw};
use crate::error::{EngineError, EngineResult};
use crate::plugin_host::HostedPlugin;
use crate::port::{ControlRange, MidiEvent, Port, PortBuffer, PortDirection, PortId, PortKind};
use crate::time_info::EngineProcessTimeInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Per-block input/output buffers for a node, keyed by port id. Owned by
/// the scheduler for the duration of one node's `process` call.
pub type PortBufferMap = HashMap<PortId, PortBuffer>;

/// The eight node kinds named by the routing engine's component model.
pub enum NodePayload {
    TrackProcessor(TrackProcessor),
    Plugin(PluginNode),
    Fader(FaderNode),
    Prefader(FaderNode),
    ChannelSend(ChannelSendNode),
    ModulatorMacro(ModulatorMacroNode),
    SampleProcessor(SampleProcessorNode),
    MonitorFader(FaderNode),
}

impl NodePayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodePayload::TrackProcessor(_) => "track_processor",
            NodePayload::Plugin(_) => "plugin",
            NodePayload::Fader(_) => "fader",
            NodePayload::Prefader(_) => "prefader",
            NodePayload::ChannelSend(_) => "channel_send",
            NodePayload::ModulatorMacro(_) => "modulator_macro",
            NodePayload::SampleProcessor(_) => "sample_processor",
            NodePayload::MonitorFader(_) => "monitor_fader",
        }
    }
}

/// A node in the graph: identity, ports, latency bookkeeping, and payload.
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    pub ports: Vec<Port>,
    /// Intrinsic processing latency this node introduces, in frames (e.g. a
    /// plugin's reported latency). Set once at build time.
    pub playback_latency: u32,
    /// `max(parents.route_playback_latency) + playback_latency`, computed
    /// by the graph builder's longest-path pass.
    pub route_playback_latency: u32,
    pub payload: NodePayload,
}

impl GraphNode {
    pub fn input_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Input)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Output)
    }

    pub fn find_port(&self, id: PortId) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    /// Run this node for one block. `inputs` holds one buffer per input
    /// port (already summed across incoming connections by the scheduler);
    /// `outputs` must be populated with one buffer per output port.
    pub fn process(
        &mut self,
        time: EngineProcessTimeInfo,
        inputs: &PortBufferMap,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        match &mut self.payload {
            NodePayload::TrackProcessor(p) => p.process(self.id, &self.ports, time, inputs, outputs),
            NodePayload::Plugin(p) => p.process(self.id, &self.ports, self.playback_latency, time, inputs, outputs),
            NodePayload::Fader(p) | NodePayload::Prefader(p) | NodePayload::MonitorFader(p) => {
                p.process(&self.ports, inputs, outputs)
            }
            NodePayload::ChannelSend(p) => p.process(&self.ports, inputs, outputs),
            NodePayload::ModulatorMacro(p) => p.process(&self.ports, inputs, outputs),
            NodePayload::SampleProcessor(p) => p.process(&self.ports, time, outputs),
        }
    }
}

fn audio_output_port_id(ports: &[Port], label: &str) -> Option<PortId> {
    ports
        .iter()
        .find(|p| p.direction == PortDirection::Output && p.label == label)
        .map(|p| p.id)
}

fn port_id_by_label(ports: &[Port], direction: PortDirection, label: &str) -> Option<PortId> {
    ports
        .iter()
        .find(|p| p.direction == direction && p.label == label)
        .map(|p| p.id)
}

fn sum_audio_inputs(ports: &[Port], inputs: &PortBufferMap, block_len: usize) -> Vec<f32> {
    let mut acc = vec![0.0; block_len];
    for p in ports.iter().filter(|p| p.direction == PortDirection::Input) {
        if let Some(buf) = inputs.get(&p.id) {
            if let Some(slice) = buf.as_audio_slice() {
                for (a, s) in acc.iter_mut().zip(slice.iter()) {
                    *a += s;
                }
            }
        }
    }
    acc
}

/// A pre-rendered region's per-channel samples, played back from a moving
/// cursor and never looped. Stands in for the arranger's clip content,
/// which is out of scope here (see project_model).
pub struct RegionBuffer {
    pub channels: Vec<Vec<f32>>,
    cursor: usize,
}

impl RegionBuffer {
    pub fn new(channels: Vec<Vec<f32>>) -> Self {
        Self { channels, cursor: 0 }
    }

    fn mix_into(&mut self, channel: usize, out: &mut [f32]) {
        let Some(samples) = self.channels.get(channel) else { return };
        let mut cursor = self.cursor;
        for s in out.iter_mut() {
            if cursor >= samples.len() {
                break;
            }
            *s += samples[cursor];
            cursor += 1;
        }
    }
}

/// TRACK_PROCESSOR: drives region playback and sums any recording-chain
/// audio input into one or two output buses (mono if a single "out" port,
/// stereo if "out_l"/"out_r").
pub struct TrackProcessor {
    pub block_len: usize,
    pub region: Option<RegionBuffer>,
    /// Events queued for delivery on this track's `events` output port
    /// (e.g. an all-notes-off from a transport seek), drained on the next
    /// `process` call.
    pub pending_events: Vec<MidiEvent>,
}

impl TrackProcessor {
    /// Queue an event for delivery on this track's `events` output port at
    /// the next `process` call.
    pub fn queue_event(&mut self, event: MidiEvent) {
        self.pending_events.push(event);
    }

    fn process(
        &mut self,
        _id: NodeId,
        ports: &[Port],
        _time: EngineProcessTimeInfo,
        inputs: &PortBufferMap,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        let input_mix = sum_audio_inputs(ports, inputs, self.block_len);

        let left_id = audio_output_port_id(ports, "out_l");
        let right_id = audio_output_port_id(ports, "out_r");

        if let (Some(left_id), Some(right_id)) = (left_id, right_id) {
            let mut left = input_mix.clone();
            let mut right = input_mix;
            if let Some(region) = self.region.as_mut() {
                region.mix_into(0, &mut left);
                region.mix_into(1.min(region.channels.len().saturating_sub(1)), &mut right);
                region.cursor = (region.cursor + self.block_len).min(region.channels.get(0).map(|c| c.len()).unwrap_or(0));
            }
            outputs.insert(left_id, PortBuffer::Audio(wrap_plain(left)));
            outputs.insert(right_id, PortBuffer::Audio(wrap_plain(right)));
        } else if let Some(out_id) = audio_output_port_id(ports, "out") {
            let mut mono = input_mix;
            if let Some(region) = self.region.as_mut() {
                region.mix_into(0, &mut mono);
                region.cursor = (region.cursor + self.block_len).min(region.channels.get(0).map(|c| c.len()).unwrap_or(0));
            }
            outputs.insert(out_id, PortBuffer::Audio(wrap_plain(mono)));
        }

        if !self.pending_events.is_empty() {
            if let Some(events_id) = port_id_by_label(ports, PortDirection::Output, "events") {
                outputs.insert(events_id, PortBuffer::Event(std::mem::take(&mut self.pending_events)));
            } else {
                self.pending_events.clear();
            }
        }
        Ok(())
    }
}

/// Thin adapter so plain `Vec<f32>` results can be stored as a `PortBuffer`
/// without going through the shared pool (used for node-internal mixing
/// results the scheduler re-copies into pooled buffers before fan-out).
fn wrap_plain(data: Vec<f32>) -> crate::port::PooledBuffer {
    crate::port::PooledBuffer::plain(data)
}

/// PLUGIN: hosts one `dyn HostedPlugin`. A plugin panic or error is caught
/// at this boundary and converted to `EngineError::PluginFault`, never
/// propagated as a panic into the scheduler.
pub struct PluginNode {
    pub plugin: Box<dyn HostedPlugin>,
    pub block_len: usize,
    /// Per-output-channel ring buffer realizing the node's reported
    /// `playback_latency` as an actual output delay, so a downstream mix
    /// sees this node's signal arrive exactly that many frames later than
    /// its input -- matching what `route_playback_latency` reports about it.
    delay_lines: Vec<VecDeque<f32>>,
}

impl PluginNode {
    pub fn new(plugin: Box<dyn HostedPlugin>, block_len: usize) -> Self {
        Self {
            plugin,
            block_len,
            delay_lines: Vec::new(),
        }
    }

    fn process(
        &mut self,
        id: NodeId,
        ports: &[Port],
        playback_latency: u32,
        _time: EngineProcessTimeInfo,
        inputs: &PortBufferMap,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        let input_ids: Vec<PortId> = ports
            .iter()
            .filter(|p| p.direction == PortDirection::Input && p.kind == PortKind::Audio)
            .map(|p| p.id)
            .collect();
        let output_ids: Vec<PortId> = ports
            .iter()
            .filter(|p| p.direction == PortDirection::Output && p.kind == PortKind::Audio)
            .map(|p| p.id)
            .collect();

        let zero = vec![0.0f32; self.block_len];
        let in_slices: Vec<&[f32]> = input_ids
            .iter()
            .map(|pid| {
                inputs
                    .get(pid)
                    .and_then(|b| b.as_audio_slice())
                    .unwrap_or(&zero)
            })
            .collect();

        let mut out_bufs: Vec<Vec<f32>> = output_ids.iter().map(|_| vec![0.0; self.block_len]).collect();
        let mut out_slices: Vec<&mut [f32]> = out_bufs.iter_mut().map(|v| v.as_mut_slice()).collect();

        let plugin = &mut self.plugin;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            plugin.process(&in_slices, &mut out_slices)
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into_engine_error(id)),
            Err(_) => {
                return Err(EngineError::PluginFault {
                    node: id,
                    reason: "plugin panicked".to_string(),
                })
            }
        }

        let latency = playback_latency as usize;
        if self.delay_lines.len() != out_bufs.len() {
            self.delay_lines = out_bufs
                .iter()
                .map(|_| VecDeque::from(vec![0.0f32; latency]))
                .collect();
        }

        for ((pid, fresh), line) in output_ids
            .into_iter()
            .zip(out_bufs.into_iter())
            .zip(self.delay_lines.iter_mut())
        {
            if latency == 0 {
                outputs.insert(pid, PortBuffer::Audio(wrap_plain(fresh)));
                continue;
            }
            let mut delayed = Vec::with_capacity(fresh.len());
            for s in fresh {
                line.push_back(s);
                delayed.push(line.pop_front().unwrap_or(0.0));
            }
            outputs.insert(pid, PortBuffer::Audio(wrap_plain(delayed)));
        }
        Ok(())
    }
}

/// FADER / PREFADER / MONITOR_FADER: applies a gain curve to its input bus.
pub struct FaderNode {
    pub block_len: usize,
    pub gain_db: f32,
    pub curve: FaderCurve,
    pub pan: f32,
    pub pan_law: PanLaw,
    pub muted: bool,
}

impl FaderNode {
    fn linear_gain(&self) -> f32 {
        if self.muted {
            return 0.0;
        }
        let db = self.gain_db;
        match self.curve {
            FaderCurve::Linear => (db / 40.0 + 1.0).max(0.0),
            FaderCurve::Logarithmic | FaderCurve::Cubic => 10f32.powf(db / 20.0),
        }
    }

    fn pan_gains(&self) -> (f32, f32) {
        let p = self.pan.clamp(-1.0, 1.0);
        let angle = (p + 1.0) * std::f32::consts::FRAC_PI_4;
        match self.pan_law {
            PanLaw::Linear => (1.0 - (p + 1.0) / 2.0, (p + 1.0) / 2.0),
            PanLaw::SquareRoot => ((1.0 - (p + 1.0) / 2.0).sqrt(), ((p + 1.0) / 2.0).sqrt()),
            PanLaw::Sine => (angle.cos(), angle.sin()),
        }
    }

    fn process(
        &mut self,
        ports: &[Port],
        inputs: &PortBufferMap,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        let gain = self.linear_gain();
        let out_ports: Vec<&Port> = ports
            .iter()
            .filter(|p| p.direction == PortDirection::Output && p.kind == PortKind::Audio)
            .collect();

        let left_in = port_id_by_label(ports, PortDirection::Input, "in_l");
        let right_in = port_id_by_label(ports, PortDirection::Input, "in_r");

        if let (Some(left_id), Some(right_id), true) = (left_in, right_in, out_ports.len() >= 2) {
            // Already-stereo bus: pass each channel through independently,
            // applying gain only. Pan only makes sense mixing a mono
            // source out to a stereo field.
            let zero = vec![0.0; self.block_len];
            let left_src = inputs.get(&left_id).and_then(|b| b.as_audio_slice()).unwrap_or(&zero);
            let right_src = inputs.get(&right_id).and_then(|b| b.as_audio_slice()).unwrap_or(&zero);
            let left: Vec<f32> = left_src.iter().map(|s| s * gain).collect();
            let right: Vec<f32> = right_src.iter().map(|s| s * gain).collect();
            outputs.insert(out_ports[0].id, PortBuffer::Audio(wrap_plain(left)));
            outputs.insert(out_ports[1].id, PortBuffer::Audio(wrap_plain(right)));
            return Ok(());
        }

        let mixed = sum_audio_inputs(ports, inputs, self.block_len);
        if out_ports.len() >= 2 {
            let (lg, rg) = self.pan_gains();
            let left: Vec<f32> = mixed.iter().map(|s| s * gain * lg).collect();
            let right: Vec<f32> = mixed.iter().map(|s| s * gain * rg).collect();
            outputs.insert(out_ports[0].id, PortBuffer::Audio(wrap_plain(left)));
            outputs.insert(out_ports[1].id, PortBuffer::Audio(wrap_plain(right)));
        } else if let Some(p) = out_ports.first() {
            let mono: Vec<f32> = mixed.iter().map(|s| s * gain).collect();
            outputs.insert(p.id, PortBuffer::Audio(wrap_plain(mono)));
        }
        Ok(())
    }
}

/// CHANNEL_SEND: taps its input bus at a configurable gain, pre- or
/// post-fader, routing a copy to an aux/return bus.
pub struct ChannelSendNode {
    pub block_len: usize,
    pub send_gain: f32,
    pub enabled: bool,
}

impl ChannelSendNode {
    fn process(
        &mut self,
        ports: &[Port],
        inputs: &PortBufferMap,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        let mixed = sum_audio_inputs(ports, inputs, self.block_len);
        let gain = if self.enabled { self.send_gain } else { 0.0 };
        if let Some(out_id) = audio_output_port_id(ports, "send_out") {
            let sent: Vec<f32> = mixed.iter().map(|s| s * gain).collect();
            outputs.insert(out_id, PortBuffer::Audio(wrap_plain(sent)));
        }
        Ok(())
    }
}

/// MODULATOR_MACRO: one macro knob fans a single CV input out to any number
/// of CV outputs scaled by the macro value, mirroring the original
/// `ModulatorMacroProcessor`'s `cv_in`/`cv_out`/`macro` triple.
pub struct ModulatorMacroNode {
    pub macro_value: f32,
    pub macro_range: ControlRange,
}

impl ModulatorMacroNode {
    fn process(
        &mut self,
        ports: &[Port],
        inputs: &PortBufferMap,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        let macro_scalar = self.macro_range.clamp(self.macro_value);
        let cv_in_id = ports
            .iter()
            .find(|p| p.direction == PortDirection::Input && p.kind == PortKind::Cv)
            .map(|p| p.id);
        let cv_in = cv_in_id.and_then(|id| inputs.get(&id)).and_then(|b| b.as_audio_slice());

        for out_port in ports.iter().filter(|p| p.direction == PortDirection::Output && p.kind == PortKind::Cv) {
            let scaled: Vec<f32> = match cv_in {
                Some(slice) => slice.iter().map(|s| s * macro_scalar).collect(),
                None => vec![macro_scalar; 1].into_iter().cycle().take(1).collect(),
            };
            outputs.insert(out_port.id, PortBuffer::Cv(wrap_plain(scaled)));
        }
        Ok(())
    }
}

/// SAMPLE_PROCESSOR: the node-graph side of the ad-hoc sample playback
/// mixer. The mixer itself lives outside the graph (see `sample_playback`);
/// this node pulls its already-mixed block and exposes it as a normal
/// audio output so it can be summed like any other source.
pub struct SampleProcessorNode {
    pub mixer: std::sync::Arc<crate::sample_playback::SamplePlaybackMixer>,
}

impl SampleProcessorNode {
    fn process(
        &mut self,
        ports: &[Port],
        time: EngineProcessTimeInfo,
        outputs: &mut PortBufferMap,
    ) -> EngineResult<()> {
        if let Some(out_id) = audio_output_port_id(ports, "out") {
            let mixed = self.mixer.render_block(time.nframes);
            outputs.insert(out_id, PortBuffer::Audio(wrap_plain(mixed)));
        }
        Ok(())
    }
}
