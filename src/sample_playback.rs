//! Ad-hoc one-shot sample playback, mixed directly into the monitor path
//! independent of the graph proper. Grounded on the original
//! `SamplePlayback` struct (buffer/channels/offset/volume/start_offset),
//! using linear-interpolation playback with `tanh` soft clipping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::ArrayQueue;

use crate::error::{EngineError, EngineResult};

/// One admitted one-shot playback request: the metronome click, an
/// audition preview, a sample-accurate arranger hit.
#[derive(Clone)]
pub struct SamplePlayback {
    pub buf: Arc<Vec<f32>>,
    pub channels: usize,
    /// Playback speed multiplier; 1.0 is native speed.
    pub speed: f32,
    /// Linear gain, 0.0 to 2.0 per the original volume field's range.
    pub gain: f32,
    /// Frame offset into `buf` to start from.
    pub start_offset: usize,
    /// Current read position, in source-buffer frames (fractional, for
    /// interpolated speed != 1.0 playback).
    position: f32,
}

impl SamplePlayback {
    pub fn new(buf: Arc<Vec<f32>>, channels: usize, gain: f32, speed: f32, start_offset: usize) -> Self {
        Self {
            buf,
            channels,
            speed: speed.max(0.0001),
            gain: gain.clamp(0.0, 2.0),
            start_offset,
            position: start_offset as f32,
        }
    }

    fn total_frames(&self) -> usize {
        self.buf.len() / self.channels.max(1)
    }

    fn is_finished(&self) -> bool {
        self.position as usize >= self.total_frames()
    }

    /// Mix `nframes` mono frames of this playback into `out`, advancing the
    /// read position by `speed` per output frame using linear
    /// interpolation. Returns `true` if the sample finished during this
    /// call.
    fn mix_into(&mut self, out: &mut [f32]) -> bool {
        let total = self.total_frames();
        let channels = self.channels.max(1);
        for sample in out.iter_mut() {
            if self.position as usize >= total {
                return true;
            }
            let idx = self.position as usize;
            let frac = self.position - idx as f32;
            let next_idx = (idx + 1).min(total - 1);

            let mut frame_val = 0.0f32;
            for ch in 0..channels {
                let a = self.buf[idx * channels + ch];
                let b = self.buf[next_idx * channels + ch];
                frame_val += a + (b - a) * frac;
            }
            frame_val /= channels as f32;

            *sample += frame_val * self.gain;
            self.position += self.speed;
        }
        self.position as usize >= total
    }
}

/// Soft-clips the final monitor mix with a `tanh() * 0.8` saturation curve.
fn soft_clip(x: f32) -> f32 {
    x.tanh() * 0.8
}

/// Bounded, lock-free admission queue plus the realtime-owned list of
/// currently-playing samples. `enqueue` is called from non-realtime
/// threads (metronome scheduler, auditioner); `render_block` runs on the
/// realtime thread.
pub struct SamplePlaybackMixer {
    pending: ArrayQueue<SamplePlayback>,
    active: Mutex<Vec<SamplePlayback>>,
    dropped: AtomicU64,
}

impl SamplePlaybackMixer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: ArrayQueue::new(capacity.max(1)),
            active: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Admit a new one-shot playback. Soft-overflow: if the admission queue
    /// is full, the request is dropped and reported rather than blocking
    /// the caller or the realtime thread.
    pub fn enqueue(&self, playback: SamplePlayback) -> EngineResult<()> {
        match self.pending.push(playback) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::config("sample playback admission queue full"))
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Render `nframes` mono frames, draining newly-admitted playbacks into
    /// the active set and retiring finished ones.
    pub fn render_block(&self, nframes: usize) -> Vec<f32> {
        let mut active = self.active.lock().expect("sample playback mixer poisoned");
        while let Some(p) = self.pending.pop() {
            active.push(p);
        }

        let mut out = vec![0.0f32; nframes];
        active.retain_mut(|p| {
            let finished = p.mix_into(&mut out);
            !finished
        });

        for s in out.iter_mut() {
            *s = soft_clip(*s);
        }
        out
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("sample playback mixer poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(n: usize) -> Arc<Vec<f32>> {
        Arc::new((0..n).map(|i| i as f32 / n as f32).collect())
    }

    #[test]
    fn mixes_and_retires_finished_playback() {
        let mixer = SamplePlaybackMixer::new(4);
        let pb = SamplePlayback::new(ramp_buffer(8), 1, 1.0, 1.0, 0);
        mixer.enqueue(pb).unwrap();

        let block1 = mixer.render_block(4);
        assert_eq!(block1.len(), 4);
        assert_eq!(mixer.active_count(), 1);

        let _block2 = mixer.render_block(4);
        assert_eq!(mixer.active_count(), 0, "sample should retire once exhausted");
    }

    #[test]
    fn overflow_reports_drop() {
        let mixer = SamplePlaybackMixer::new(1);
        mixer.enqueue(SamplePlayback::new(ramp_buffer(8), 1, 1.0, 1.0, 0)).unwrap();
        let result = mixer.enqueue(SamplePlayback::new(ramp_buffer(8), 1, 1.0, 1.0, 0));
        assert!(result.is_err());
        assert_eq!(mixer.dropped_count(), 1);
    }

    #[test]
    fn soft_clip_keeps_output_bounded() {
        assert!(soft_clip(100.0) < 1.0);
        assert!(soft_clip(-100.0) > -1.0);
    }
}
