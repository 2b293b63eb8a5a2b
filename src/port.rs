//! Port and buffer model: typed carriers between graph nodes, backed by a
//! lock-free buffer pool so the realtime threads never call the allocator
//! on the steady-state path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

/// Stable identifier for a port, unique within a single `Graph`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    Cv,
    Control,
    Event,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// A single MIDI-style ordered event inside an `Event` port's buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct MidiEvent {
    /// Offset in frames from the start of the current block.
    pub frame_offset: u32,
    pub bytes: Vec<u8>,
}

impl MidiEvent {
    /// Channel-0 "All Notes Off" control change (CC 123, value 0), queued at
    /// the start of the block it lands in.
    pub fn all_notes_off() -> Self {
        Self {
            frame_offset: 0,
            bytes: vec![0xB0, 0x7B, 0x00],
        }
    }
}

/// The carried payload of a port for one processing block.
///
/// `Audio`/`Cv` buffers are pooled `Vec<f32>`s of exactly `block_len`
/// samples; `Control` is a single scalar; `Event` is a frame-ordered list of
/// MIDI-style messages.
#[derive(Clone, Debug)]
pub enum PortBuffer {
    Audio(PooledBuffer),
    Cv(PooledBuffer),
    Control(f32),
    Event(Vec<MidiEvent>),
}

impl PortBuffer {
    pub fn kind(&self) -> PortKind {
        match self {
            PortBuffer::Audio(_) => PortKind::Audio,
            PortBuffer::Cv(_) => PortKind::Cv,
            PortBuffer::Control(_) => PortKind::Control,
            PortBuffer::Event(_) => PortKind::Event,
        }
    }

    pub fn as_audio_slice(&self) -> Option<&[f32]> {
        match self {
            PortBuffer::Audio(b) | PortBuffer::Cv(b) => Some(&b.data),
            _ => None,
        }
    }

    pub fn as_audio_slice_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            PortBuffer::Audio(b) | PortBuffer::Cv(b) => Some(&mut b.data),
            _ => None,
        }
    }
}

/// Full port identity: kind, direction, and for `Control` ports the
/// scalar range/default the original system associates with automation.
#[derive(Clone, Debug)]
pub struct Port {
    pub id: PortId,
    pub label: String,
    /// Stable automation symbol, independent of the display label.
    pub symbol: String,
    pub kind: PortKind,
    pub direction: PortDirection,
    /// Only meaningful for `Control` ports.
    pub control_range: Option<ControlRange>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ControlRange {
    pub fn clamp(&self, v: f32) -> f32 {
        v.clamp(self.min.min(self.max), self.max.max(self.min))
    }
}

impl Port {
    pub fn new_audio(id: PortId, label: impl Into<String>, direction: PortDirection) -> Self {
        let label = label.into();
        let symbol = label.to_lowercase().replace(' ', "_");
        Self {
            id,
            label,
            symbol,
            kind: PortKind::Audio,
            direction,
            control_range: None,
        }
    }

    pub fn new_cv(id: PortId, label: impl Into<String>, direction: PortDirection) -> Self {
        let label = label.into();
        let symbol = label.to_lowercase().replace(' ', "_");
        Self {
            id,
            label,
            symbol,
            kind: PortKind::Cv,
            direction,
            control_range: None,
        }
    }

    pub fn new_control(
        id: PortId,
        label: impl Into<String>,
        direction: PortDirection,
        range: ControlRange,
    ) -> Self {
        let label = label.into();
        let symbol = label.to_lowercase().replace(' ', "_");
        Self {
            id,
            label,
            symbol,
            kind: PortKind::Control,
            direction,
            control_range: Some(range),
        }
    }

    pub fn new_event(id: PortId, label: impl Into<String>, direction: PortDirection) -> Self {
        let label = label.into();
        let symbol = label.to_lowercase().replace(' ', "_");
        Self {
            id,
            label,
            symbol,
            kind: PortKind::Event,
            direction,
            control_range: None,
        }
    }
}

/// Connection between two ports. Mutated only through `ConnectionEdit`, so
/// there is no duplicate string-to-enum mapping ambiguity the way the
/// original YAML-backed action table had.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Connection {
    pub from: PortId,
    pub to: PortId,
    pub enabled: bool,
    /// Gain multiplier applied while copying `from` into `to`.
    pub multiplier: f32,
}

impl Connection {
    pub fn new(from: PortId, to: PortId) -> Self {
        Self {
            from,
            to,
            enabled: true,
            multiplier: 1.0,
        }
    }

    /// Mono-to-stereo policy: duplicate the mono source to both channels of
    /// a stereo destination, unattenuated.
    pub fn duplicate_mono_to_stereo(mono_out: PortId, stereo_in_l: PortId, stereo_in_r: PortId) -> [Connection; 2] {
        [Connection::new(mono_out, stereo_in_l), Connection::new(mono_out, stereo_in_r)]
    }

    /// Stereo-to-mono policy: average L and R into the mono destination.
    pub fn average_stereo_to_mono(stereo_out_l: PortId, stereo_out_r: PortId, mono_in: PortId) -> [Connection; 2] {
        let mut left = Connection::new(stereo_out_l, mono_in);
        left.multiplier = 0.5;
        let mut right = Connection::new(stereo_out_r, mono_in);
        right.multiplier = 0.5;
        [left, right]
    }
}

/// Explicit, unambiguous edits to a connection. See DESIGN.md for why this
/// replaces the original action-table's string keys.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConnectionEdit {
    Connect,
    Disconnect,
    Enable,
    Disable,
    ChangeMultiplier(f32),
}

/// A pooled `Vec<f32>` of fixed length, returned to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Vec<f32>,
    pool: Option<Arc<BufferPoolInner>>,
}

impl Clone for PooledBuffer {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            pool: None,
        }
    }
}

impl PooledBuffer {
    /// Wrap a plain `Vec<f32>` with no backing pool. Used for node-internal
    /// scratch results that the scheduler re-copies into pooled buffers
    /// before fan-out, so there is nothing to return on drop.
    pub fn plain(data: Vec<f32>) -> Self {
        Self { data, pool: None }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<f32>;
    fn deref(&self) -> &Vec<f32> {
        &self.data
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<f32> {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut data = std::mem::take(&mut self.data);
            data.iter_mut().for_each(|s| *s = 0.0);
            if pool.free.push(data).is_ok() {
                pool.current_size.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

struct BufferPoolInner {
    free: ArrayQueue<Vec<f32>>,
    buffer_len: usize,
    allocations: AtomicUsize,
    reuses: AtomicUsize,
    current_size: AtomicUsize,
}

/// Lock-free pool of fixed-length audio buffers shared by every port in a
/// graph. Acquiring a buffer never blocks; on an empty pool it allocates.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    pub fn new(buffer_len: usize, capacity: usize) -> Self {
        let free = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let _ = free.push(vec![0.0; buffer_len]);
        }
        Self {
            inner: Arc::new(BufferPoolInner {
                free,
                buffer_len,
                allocations: AtomicUsize::new(0),
                reuses: AtomicUsize::new(0),
                current_size: AtomicUsize::new(capacity),
            }),
        }
    }

    pub fn acquire(&self) -> PooledBuffer {
        let data = if let Some(mut data) = self.inner.free.pop() {
            self.inner.current_size.fetch_sub(1, Ordering::Relaxed);
            self.inner.reuses.fetch_add(1, Ordering::Relaxed);
            data.resize(self.inner.buffer_len, 0.0);
            data
        } else {
            self.inner.allocations.fetch_add(1, Ordering::Relaxed);
            vec![0.0; self.inner.buffer_len]
        };
        PooledBuffer {
            data,
            pool: Some(self.inner.clone()),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocations: self.inner.allocations.load(Ordering::Relaxed),
            reuses: self.inner.reuses.load(Ordering::Relaxed),
            pooled: self.inner.current_size.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub allocations: usize,
    pub reuses: usize,
    pub pooled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_returned_buffers() {
        let pool = BufferPool::new(64, 2);
        {
            let mut b = pool.acquire();
            b[0] = 1.0;
        }
        let stats = pool.stats();
        assert_eq!(stats.pooled, 2);
        let b2 = pool.acquire();
        assert_eq!(b2[0], 0.0, "returned buffers are cleared before reuse");
    }

    #[test]
    fn acquire_allocates_past_capacity() {
        let pool = BufferPool::new(8, 1);
        let _a = pool.acquire();
        let _b = pool.acquire();
        assert!(pool.stats().allocations >= 1);
    }

    #[test]
    fn duplicate_mono_to_stereo_feeds_both_channels_unattenuated() {
        let conns = Connection::duplicate_mono_to_stereo(PortId(1), PortId(2), PortId(3));
        assert_eq!(conns[0].from, PortId(1));
        assert_eq!(conns[0].to, PortId(2));
        assert_eq!(conns[1].to, PortId(3));
        assert!(conns.iter().all(|c| c.multiplier == 1.0));
    }

    #[test]
    fn average_stereo_to_mono_halves_each_channel() {
        let conns = Connection::average_stereo_to_mono(PortId(1), PortId(2), PortId(3));
        assert!(conns.iter().all(|c| c.to == PortId(3) && c.multiplier == 0.5));
        assert_eq!(conns[0].from, PortId(1));
        assert_eq!(conns[1].from, PortId(2));
    }

    #[test]
    fn control_range_clamps() {
        let r = ControlRange {
            min: 0.0,
            max: 1.0,
            default: 0.5,
        };
        assert_eq!(r.clamp(2.0), 1.0);
        assert_eq!(r.clamp(-2.0), 0.0);
    }
}
