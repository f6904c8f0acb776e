use fxhash::FxHashMap;
use std::{cmp::Reverse, collections::BinaryHeap, time::Instant};

/// Handle to a scheduled timer, used for cancellation.
///
/// Handles are never reused, so cancelling an already-fired or
/// already-cancelled timer is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerHandle(u64);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: Instant,
    // monotonically increasing, so ties on the deadline fire in
    // insertion order
    id: u64,
}

/// Single-shot timers ordered by absolute deadline.
///
/// Cancellation removes the payload in O(1); the heap entry is discarded
/// lazily when it surfaces.
pub(crate) struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<Entry>>,
    pending: FxHashMap<u64, T>,
    next_id: u64,
}

impl<T> TimerQueue<T> {
    pub(crate) fn new() -> TimerQueue<T> {
        TimerQueue {
            heap: BinaryHeap::new(),
            pending: FxHashMap::default(),
            next_id: 0,
        }
    }

    pub(crate) fn schedule(&mut self, deadline: Instant, payload: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(Entry { deadline, id }));
        self.pending.insert(id, payload);
        TimerHandle(id)
    }

    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        self.pending.remove(&handle.0)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The earliest deadline that is still pending, if any.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.pending.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns the next timer with `deadline <= now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<T> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if !self.pending.contains_key(&entry.id) {
                self.heap.pop();
                continue;
            }
            if entry.deadline > now {
                return None;
            }
            let id = entry.id;
            self.heap.pop();
            return self.pending.remove(&id);
        }
        None
    }
}
