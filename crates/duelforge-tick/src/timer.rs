//! Due-event timers.
//!
//! A [`TimerQueue`] stores `(deadline, event)` pairs. Nothing fires on its
//! own: the owner calls [`pop_due`](TimerQueue::pop_due) from its tick and
//! handles whatever came back. Cancelling a handle guarantees the event
//! will never be returned.

use std::collections::BTreeMap;

use tokio::time::Instant;

/// Identifies one scheduled event for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    at: Instant,
    seq: u64,
}

/// Events ordered by deadline, ties broken by scheduling order.
#[derive(Debug)]
pub struct TimerQueue<E> {
    entries: BTreeMap<(Instant, u64), E>,
    next_seq: u64,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` to become due at `at`.
    pub fn schedule(&mut self, at: Instant, event: E) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((at, seq), event);
        TimerHandle { at, seq }
    }

    /// Removes a scheduled event. Returns it if it was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<E> {
        self.entries.remove(&(handle.at, handle.seq))
    }

    /// Removes and returns the earliest event whose deadline is at or
    /// before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<E> {
        let (&(at, _), _) = self.entries.first_key_value()?;
        if at > now {
            return None;
        }
        self.entries.pop_first().map(|(_, event)| event)
    }

    /// Deadline of the earliest pending event.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Drops every pending event.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
