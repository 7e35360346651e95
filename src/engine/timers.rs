//! Deferred work keyed to the engine clock.
//!
//! Timers never act on their own: firing hands a [`TimerKind`] back to the
//! scheduler, which checks that the timer id is still the one the track is
//! waiting for. Cancellation is therefore just forgetting the id.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::track::TrackId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Arm the next loop iteration for this track.
    ReArm(TrackId),
    /// A fade-out ramp (plus grace) has run its course; tear down.
    FadeOutDone(TrackId),
    /// A non-looping track's sole segment has finished.
    NaturalEnd(TrackId),
}

#[derive(Debug)]
struct Entry {
    due_frame: u64,
    id: TimerId,
    kind: TimerKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due_frame == other.due_frame && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Tie-break on id so same-frame timers fire in schedule order.
        (self.due_frame, self.id.0).cmp(&(other.due_frame, other.id.0))
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `kind` to fire once the engine clock reaches `due_frame` and
    /// return the id the owning track should remember.
    pub(crate) fn schedule(&mut self, due_frame: u64, kind: TimerKind) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse(Entry {
            due_frame,
            id,
            kind,
        }));
        id
    }

    /// Earliest due frame across all pending timers.
    pub(crate) fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(e)| e.due_frame)
    }

    /// Pop the next timer whose due frame has been reached.
    pub(crate) fn pop_due(&mut self, now: u64) -> Option<(TimerId, TimerKind)> {
        match self.heap.peek() {
            Some(Reverse(e)) if e.due_frame <= now => {
                let Reverse(e) = self.heap.pop().unwrap();
                Some((e.id, e.kind))
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
