//! Transport state machine: play/pause, tempo, meter, loop points.
//!
//! Grounded on the original engine's `transport_set_bpm` /
//! `transport_request_pause` behavior: requests are observed for exactly one
//! cycle in an intermediate state before the engine commits the effective
//! transition, so a worker mid-cycle never sees the playstate change out
//! from under it.

use serde::{Deserialize, Serialize};

use crate::port::MidiEvent;
use crate::time_info::EngineProcessTimeInfo;

pub const MIN_BPM: f32 = 20.0;
pub const MAX_BPM: f32 = 960.0;
/// Ticks per quarter note, matching the original engine's PPQN.
const TICKS_PER_QUARTER: f64 = 960.0;

/// A marker stored in musical ticks (tempo-independent) with a cached frame
/// value recomputed by `update_position_frames` whenever tempo or meter
/// changes. Used for cue points/markers, as distinct from `playhead`, which
/// is always tracked directly in frames.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedPosition {
    pub ticks: u64,
    pub frame: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Paused,
    PauseRequested,
    RollRequested,
    Rolling,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Exported via `serde` so a caller (project I/O, out of scope here) can
/// persist and restore a transport snapshot across sessions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub play_state: PlayState,
    bpm: f32,
    pub time_signature: TimeSignature,
    pub playhead: u64,
    /// Exclusive end of the active loop region, in frames. `None` disables
    /// looping.
    pub loop_region: Option<(u64, u64)>,
    pub sample_rate: f64,
    /// Reported output latency of the audio backend, in frames; folded into
    /// `EngineProcessTimeInfo` construction the same way the original
    /// `transport_set_bpm` path folds `update_frames_per_tick`.
    pub client_latency: u32,
    /// Cue points/markers, tempo-independent in storage; `frame` is a cache
    /// recomputed by `update_position_frames`.
    pub named_positions: Vec<NamedPosition>,
}

impl Transport {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            play_state: PlayState::Paused,
            bpm: 120.0,
            time_signature: TimeSignature::default(),
            playhead: 0,
            loop_region: None,
            sample_rate,
            client_latency: 0,
            named_positions: Vec::new(),
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Clamps to `[MIN_BPM, MAX_BPM]`, recomputes `frames_per_tick`, and
    /// recomputes every named position's cached frame value -- not safe to
    /// call from the realtime thread directly; callers route this through
    /// the control-change queue.
    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.update_position_frames();
    }

    pub fn frames_per_tick(&self) -> f64 {
        (self.sample_rate * 60.0) / (self.bpm as f64 * TICKS_PER_QUARTER)
    }

    /// Recomputes every named position's cached `frame` value from its
    /// tempo-independent `ticks`. Called after any BPM or meter change.
    pub fn update_position_frames(&mut self) {
        let frames_per_tick = self.frames_per_tick();
        for pos in &mut self.named_positions {
            pos.frame = (pos.ticks as f64 * frames_per_tick).round() as u64;
        }
    }

    /// Advance the playhead by `frames`; a no-op unless the transport is
    /// rolling.
    pub fn add_to_playhead(&mut self, frames: i64) {
        if !self.is_rolling() {
            return;
        }
        self.playhead = (self.playhead as i64 + frames).max(0) as u64;
    }

    /// Jump the playhead to `target` immediately, independent of play state.
    /// Returns the single all-notes-off event the caller must deliver to
    /// every active track's event buffer, since a hard jump can otherwise
    /// strand a note in a sounding state.
    pub fn move_playhead(&mut self, target: u64) -> MidiEvent {
        self.playhead = target;
        MidiEvent::all_notes_off()
    }

    pub fn request_pause(&mut self) {
        if self.play_state == PlayState::Rolling {
            self.play_state = PlayState::PauseRequested;
        }
    }

    pub fn request_roll(&mut self) {
        if self.play_state == PlayState::Paused {
            self.play_state = PlayState::RollRequested;
        }
    }

    /// Advance the request states to their settled state. Called exactly
    /// once per cycle, before the cycle's nodes run, so a request is
    /// observed in its intermediate state for exactly one cycle.
    pub fn settle_requests(&mut self) {
        self.play_state = match self.play_state {
            PlayState::PauseRequested => PlayState::Paused,
            PlayState::RollRequested => PlayState::Rolling,
            other => other,
        };
    }

    pub fn is_rolling(&self) -> bool {
        matches!(self.play_state, PlayState::Rolling | PlayState::PauseRequested)
    }

    /// Split a would-be cycle of `nframes` frames starting at the current
    /// playhead into one or two sub-cycles, so that a loop wrap never
    /// crosses a single `EngineProcessTimeInfo`. Advances `playhead`.
    pub fn split_cycle(&mut self, g_start_frame: u64, nframes: usize) -> Vec<EngineProcessTimeInfo> {
        if !self.is_rolling() {
            return vec![EngineProcessTimeInfo::new(g_start_frame, 0, nframes)];
        }
        let Some((loop_start, loop_end)) = self.loop_region else {
            self.playhead += nframes as u64;
            return vec![EngineProcessTimeInfo::new(g_start_frame, 0, nframes)];
        };
        if self.playhead < loop_start || self.playhead >= loop_end {
            self.playhead += nframes as u64;
            return vec![EngineProcessTimeInfo::new(g_start_frame, 0, nframes)];
        }
        let remaining_in_loop = (loop_end - self.playhead) as usize;
        if remaining_in_loop >= nframes {
            self.playhead += nframes as u64;
            return vec![EngineProcessTimeInfo::new(g_start_frame, 0, nframes)];
        }
        let first_len = remaining_in_loop;
        let second_len = nframes - first_len;
        self.playhead = loop_start + second_len as u64;
        vec![
            EngineProcessTimeInfo::new(g_start_frame, 0, first_len),
            // The second sub-cycle resumes at the loop start, not at
            // g_start_frame + first_len -- that would describe unwrapped
            // playhead continuation, not the post-wrap position.
            EngineProcessTimeInfo::new(loop_start, first_len, second_len),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_clamps_to_range() {
        let mut t = Transport::new(48_000.0);
        t.set_bpm(-5.0);
        assert_eq!(t.bpm(), MIN_BPM);
        t.set_bpm(10_000.0);
        assert_eq!(t.bpm(), MAX_BPM);
    }

    #[test]
    fn move_playhead_is_immediate_and_emits_all_notes_off() {
        let mut t = Transport::new(48_000.0);
        t.play_state = PlayState::Paused;
        let event = t.move_playhead(5_000);
        assert_eq!(t.playhead, 5_000);
        assert_eq!(event.bytes, vec![0xB0, 0x7B, 0x00]);
    }

    #[test]
    fn add_to_playhead_only_advances_while_rolling() {
        let mut t = Transport::new(48_000.0);
        t.add_to_playhead(64);
        assert_eq!(t.playhead, 0, "paused transport must not advance");
        t.play_state = PlayState::Rolling;
        t.add_to_playhead(64);
        assert_eq!(t.playhead, 64);
    }

    #[test]
    fn update_position_frames_tracks_bpm_changes() {
        let mut t = Transport::new(48_000.0);
        t.named_positions.push(NamedPosition { ticks: 960, frame: 0 });
        t.set_bpm(120.0);
        let at_120 = t.named_positions[0].frame;
        t.set_bpm(60.0);
        let at_60 = t.named_positions[0].frame;
        assert!(at_60 > at_120, "halving bpm must double the frame position of a fixed tick");
    }

    #[test]
    fn request_pause_holds_for_one_cycle() {
        let mut t = Transport::new(48_000.0);
        t.request_roll();
        assert_eq!(t.play_state, PlayState::RollRequested);
        t.settle_requests();
        assert_eq!(t.play_state, PlayState::Rolling);
        t.request_pause();
        assert_eq!(t.play_state, PlayState::PauseRequested);
        assert!(t.is_rolling(), "pause-requested cycle still counts as rolling");
        t.settle_requests();
        assert_eq!(t.play_state, PlayState::Paused);
    }

    #[test]
    fn loop_wrap_splits_cycle_in_two() {
        let mut t = Transport::new(48_000.0);
        t.play_state = PlayState::Rolling;
        t.loop_region = Some((0, 100));
        t.playhead = 90;
        let parts = t.split_cycle(1_000, 64);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].nframes, 10);
        assert_eq!(parts[0].g_start_frame, 1_000);
        assert_eq!(parts[1].nframes, 54);
        assert_eq!(parts[1].local_offset, 10);
        assert_eq!(parts[1].g_start_frame, 0, "second sub-cycle resumes at loop_start");
        assert_eq!(t.playhead, 54);
    }

    #[test]
    fn no_wrap_when_cycle_fits_inside_loop() {
        let mut t = Transport::new(48_000.0);
        t.play_state = PlayState::Rolling;
        t.loop_region = Some((0, 1_000));
        t.playhead = 0;
        let parts = t.split_cycle(0, 64);
        assert_eq!(parts.len(), 1);
        assert_eq!(t.playhead, 64);
    }
}

#[cfg(test)]
mod roundtrip {
    use super::*;
    use proptest::prelude::*;

    fn play_state_strategy() -> impl Strategy<Value = PlayState> {
        prop_oneof![
            Just(PlayState::Paused),
            Just(PlayState::PauseRequested),
            Just(PlayState::RollRequested),
            Just(PlayState::Rolling),
        ]
    }

    proptest! {
        /// A transport snapshot serialized to JSON and back must compare
        /// equal to the original, for any field combination -- the property
        /// a caller persisting transport state across sessions depends on.
        #[test]
        fn transport_json_round_trips(
            play_state in play_state_strategy(),
            bpm in MIN_BPM..=MAX_BPM,
            numerator in 1u8..=32,
            denominator in 1u8..=32,
            playhead in any::<u64>(),
            loop_region in proptest::option::of((any::<u64>(), any::<u64>())),
            client_latency in any::<u32>(),
        ) {
            let mut t = Transport::new(48_000.0);
            t.play_state = play_state;
            t.set_bpm(bpm);
            t.time_signature = TimeSignature { numerator, denominator };
            t.playhead = playhead;
            t.loop_region = loop_region;
            t.client_latency = client_latency;

            let encoded = serde_json::to_string(&t).expect("transport should serialize");
            let decoded: Transport = serde_json::from_str(&encoded).expect("transport should deserialize");
            prop_assert_eq!(decoded, t);
        }
    }
}
