//! Lock-free channel carrying tempo/meter/loop/transport-request changes
//! from non-realtime threads into the realtime cycle-kickoff thread.
//!
//! Grounded on the original router's `ctrl_port_change_queue`, but rather
//! than a generic ring (which cannot dedupe in place), each change kind gets
//! its own mailbox cell: a later write of the same kind simply overwrites an
//! earlier, not-yet-applied one instead of queuing both or blocking the
//! writer. Built on `crossbeam::atomic::AtomicCell`, which is wait-free for
//! the small `Copy` payloads used here.

use crossbeam::atomic::AtomicCell;

use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlPortChange {
    Bpm(f32),
    TimeSignature { numerator: u8, denominator: u8 },
    LoopRegion(Option<(u64, u64)>),
    RequestRoll,
    RequestPause,
}

const KIND_COUNT: usize = 5;

fn kind_index(c: &ControlPortChange) -> usize {
    match c {
        ControlPortChange::Bpm(_) => 0,
        ControlPortChange::TimeSignature { .. } => 1,
        ControlPortChange::LoopRegion(_) => 2,
        ControlPortChange::RequestRoll => 3,
        ControlPortChange::RequestPause => 4,
    }
}

/// Non-realtime handle used to enqueue changes. Cheap to clone; every clone
/// writes into the same mailboxes.
#[derive(Clone)]
pub struct ControlChangeQueue {
    mailboxes: std::sync::Arc<[AtomicCell<Option<ControlPortChange>>; KIND_COUNT]>,
}

impl ControlChangeQueue {
    pub fn new() -> Self {
        Self {
            mailboxes: std::sync::Arc::new(std::array::from_fn(|_| AtomicCell::new(None))),
        }
    }

    /// Enqueue a change, overwriting any pending, not-yet-applied change of
    /// the same kind.
    pub fn push(&self, change: ControlPortChange) {
        self.mailboxes[kind_index(&change)].store(Some(change));
    }

    /// Apply exactly one pending change (lowest kind index first) to the
    /// transport. Returns whether a change was applied.
    pub fn try_apply_one(&self, transport: &mut Transport) -> bool {
        for mailbox in self.mailboxes.iter() {
            if let Some(change) = mailbox.swap(None) {
                apply(change, transport);
                return true;
            }
        }
        false
    }

    pub fn drain_apply(&self, transport: &mut Transport) -> usize {
        let mut n = 0;
        while self.try_apply_one(transport) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.iter().all(|m| m.load().is_none())
    }
}

impl Default for ControlChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(change: ControlPortChange, transport: &mut Transport) {
    match change {
        ControlPortChange::Bpm(bpm) => transport.set_bpm(bpm),
        ControlPortChange::TimeSignature {
            numerator,
            denominator,
        } => {
            transport.time_signature.numerator = numerator;
            transport.time_signature.denominator = denominator;
        }
        ControlPortChange::LoopRegion(region) => transport.loop_region = region,
        ControlPortChange::RequestRoll => transport.request_roll(),
        ControlPortChange::RequestPause => transport.request_pause(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_one_change_per_call() {
        let q = ControlChangeQueue::new();
        q.push(ControlPortChange::Bpm(140.0));
        q.push(ControlPortChange::RequestRoll);
        let mut t = Transport::new(48_000.0);
        assert!(q.drain_apply(&mut t) >= 2);
        assert_eq!(t.bpm(), 140.0);
    }

    #[test]
    fn overflow_overwrites_same_kind_pending_change() {
        let q = ControlChangeQueue::new();
        q.push(ControlPortChange::Bpm(100.0));
        q.push(ControlPortChange::Bpm(200.0));
        let mut t = Transport::new(48_000.0);
        q.drain_apply(&mut t);
        assert_eq!(t.bpm(), 200.0);
    }

    #[test]
    fn distinct_kinds_all_apply() {
        let q = ControlChangeQueue::new();
        q.push(ControlPortChange::Bpm(90.0));
        q.push(ControlPortChange::TimeSignature {
            numerator: 3,
            denominator: 4,
        });
        let mut t = Transport::new(48_000.0);
        let applied = q.drain_apply(&mut t);
        assert_eq!(applied, 2);
        assert_eq!(t.time_signature.numerator, 3);
    }
}
