//! Per-port timers ordered by deadline.

use vesper_core::PriorityQueue;

use crate::port::Port;

/// At most one deadline per port; the soonest is always at hand.
#[derive(Debug, Default)]
pub struct TimeoutQueue {
    timers: PriorityQueue<i64, Port>,
}

impl TimeoutQueue {
    pub fn new() -> Self {
        TimeoutQueue::default()
    }

    /// Set `port`'s deadline in monotonic milliseconds. A negative deadline
    /// cancels the timer.
    pub fn update_timeout(&mut self, port: Port, deadline_ms: i64) {
        if deadline_ms < 0 {
            self.timers.remove_by_value(port);
        } else {
            self.timers.insert_or_change_priority(deadline_ms, port);
        }
    }

    #[inline]
    pub fn has_timeout(&self) -> bool {
        !self.timers.is_empty()
    }

    /// The soonest deadline.
    pub fn current_timeout(&self) -> Option<i64> {
        self.has_timeout().then(|| self.timers.minimum().priority)
    }

    /// The port whose deadline is soonest.
    pub fn current_port(&self) -> Option<Port> {
        self.has_timeout().then(|| self.timers.minimum().value)
    }

    /// Drop the soonest timer, returning its port.
    pub fn remove_current(&mut self) -> Option<Port> {
        self.has_timeout().then(|| self.timers.remove_minimum().value)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Milliseconds from `now` until the soonest deadline, zero if it has
    /// passed.
    pub fn millis_until_next(&self, now: i64) -> Option<i64> {
        self.current_timeout().map(|deadline| (deadline - now).max(0))
    }

    /// Remove and return the port of every timer due at `now`.
    pub fn take_expired(&mut self, now: i64) -> Vec<Port> {
        let mut expired = Vec::new();
        while self.current_timeout().is_some_and(|deadline| deadline <= now) {
            if let Some(port) = self.remove_current() {
                expired.push(port);
            }
        }
        expired
    }
}
