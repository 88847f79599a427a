// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared timer queue.
//!
//! Transactions own up to four timers each and channel contexts one; a
//! single ordered queue serves them all. The queue is poll-driven:
//! nothing fires until the owner calls [`TimerQueue::poll`] with the
//! current instant, which keeps timer behavior deterministic under test.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Handle for cancelling a scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Ordered (deadline, sequence) timer queue.
///
/// The sequence number breaks ties between entries sharing a deadline, so
/// the ordering is total and FIFO among equals.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Schedules `value` to fire `after` from `now`.
    pub fn schedule(&mut self, now: Instant, after: Duration, value: T) -> TimerHandle {
        self.schedule_at(now + after, value)
    }

    pub fn schedule_at(&mut self, deadline: Instant, value: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((deadline, seq), value);
        self.deadlines.insert(seq, deadline);
        TimerHandle(seq)
    }

    /// Cancels a pending entry, returning its value when it had not fired.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let deadline = self.deadlines.remove(&handle.0)?;
        self.entries.remove(&(deadline, handle.0))
    }

    /// The earliest pending deadline, for drivers that sleep until it.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every entry due at or before `now`, in
    /// deadline order.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        loop {
            let key = match self.entries.keys().next() {
                Some(&(deadline, seq)) if deadline <= now => (deadline, seq),
                _ => break,
            };
            if let Some(value) = self.entries.remove(&key) {
                self.deadlines.remove(&key.1);
                due.push(value);
            }
        }
        due
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
