//! One-shot per-connection timers.
//!
//! Grounded on the min-heap timeout wheel pattern used by the pack's mio
//! reactor (`radicle-node`'s `reactor::timer`): a `BinaryHeap` keyed by
//! expiry `Instant`, queried each tick for "how long until the next
//! deadline" (feeds the OS poll timeout) and for "which deadlines have
//! already passed" (fired once each, then dropped unless rearmed).

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    time::{Duration, Instant},
};

use mio::Token;

#[derive(Debug, Eq, PartialEq)]
struct Entry {
    deadline: Instant,
    token: Token,
    /// Bumped by `extend`; a popped entry whose generation doesn't match
    /// the live one is stale (the timer was rearmed after being queued for
    /// expiry) and is silently discarded instead of firing.
    generation: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse so `BinaryHeap` (a max-heap) pops the soonest deadline first.
        Reverse(self.deadline).cmp(&Reverse(other.deadline))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Tracks pending timer deadlines for a single [`crate::reactor::Reactor`].
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    generations: std::collections::HashMap<Token, u64>,
}

impl TimerQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or rearms) `token` to fire `timeout` from `now`.
    pub fn set(&mut self, token: Token, timeout: Duration, now: Instant) {
        let generation = self.generations.entry(token).or_insert(0);
        *generation += 1;
        self.heap.push(Entry {
            deadline: now + timeout,
            token,
            generation: *generation,
        });
    }

    /// Cancels a timer. Safe to call even if it already fired or was never
    /// set.
    pub fn cancel(&mut self, token: Token) {
        // Bumping the generation without pushing a new entry means any
        // already-queued `Entry` for this token is now stale and will be
        // discarded in `pop_expired` without firing.
        if let Some(g) = self.generations.get_mut(&token) {
            *g += 1;
        }
    }

    /// Duration until the next deadline, if any timer is armed.
    pub fn next_expiring_from(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|e| e.deadline.saturating_duration_since(now))
    }

    /// Removes and returns every token whose deadline is `<= now` and which
    /// has not been superseded by a later `set`/`cancel` call. Each
    /// returned token fires exactly once.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<Token> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            let current = self.generations.get(&entry.token).copied().unwrap_or(0);
            if current == entry.generation {
                fired.push(entry.token);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_once_per_set() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.set(Token(1), Duration::from_millis(0), now);
        assert_eq!(q.pop_expired(now), vec![Token(1)]);
        assert!(q.pop_expired(now).is_empty());
    }

    #[test]
    fn cancel_suppresses_pending_fire() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.set(Token(1), Duration::from_millis(0), now);
        q.cancel(Token(1));
        assert!(q.pop_expired(now).is_empty());
    }

    #[test]
    fn rearm_after_fire_delivers_one_more() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.set(Token(1), Duration::from_millis(0), now);
        assert_eq!(q.pop_expired(now), vec![Token(1)]);
        q.set(Token(1), Duration::from_millis(0), now);
        assert_eq!(q.pop_expired(now), vec![Token(1)]);
    }
}
