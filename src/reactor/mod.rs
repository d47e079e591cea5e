//! The readiness reactor: a single-threaded, slab-indexed wrapper around
//! [`mio::Poll`] that the [`crate::service::Api`] façade drives each tick.
//!
//! The reactor is deliberately protocol-oblivious. It knows nothing about
//! HTTP, WebSocket, or the packet codec; it only tracks which descriptors
//! are registered, what they are interested in, and when their timers are
//! due. Everything it reports is a [`Token`] (the slab index handed back by
//! `register`) paired with a [`Reason`]. Translating a `Reason` into a
//! user-visible event — and deciding what to do about it — is the façade's
//! job, not the reactor's.
//!
//! Grounded on the teacher's single-threaded `MultiListener` run loop
//! (`Poll::poll` + `for event in events.iter()`), generalized from "accept
//! loop over listeners" to "arbitrary registered descriptors", and on the
//! pack's `radicle-node` reactor for the timer-driven poll timeout.

mod timer;

use std::{io, time::Duration, time::Instant};

use bitflags::bitflags;
use mio::{event::Source, Events, Poll, Token, Waker};
use slab::Slab;

pub use timer::TimerQueue;

bitflags! {
    /// Readiness interest/notification mask. Mirrors the C original's
    /// `{readable, writable, hang-up, error, priority}` bitfield; `mio`
    /// only lets us *request* readable/writable, but a completed event can
    /// additionally report hang-up/error/priority, so the same type is used
    /// for both directions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        /// Ready to read, or "please tell me when readable".
        const READABLE = 0b0000_0001;
        /// Ready to write, or "please tell me when writable".
        const WRITABLE = 0b0000_0010;
        /// Peer closed its write half, or the connection hung up.
        const HUP       = 0b0000_0100;
        /// The descriptor is in an error state.
        const ERROR     = 0b0000_1000;
        /// Out-of-band/priority data is available.
        const PRIORITY  = 0b0001_0000;
    }
}

impl Interest {
    /// `mio::Interest` has no empty value, unlike this bitfield (spec
    /// §4.1 allows a zero initial interest mask, e.g. a paused
    /// connection). A zero mask is kept registered at the OS level as
    /// readable-only — cheap to ignore — while the cached mask on the
    /// connection record stays truthfully empty.
    fn to_mio(self) -> mio::Interest {
        let mut interest = if self.contains(Interest::READABLE) {
            Some(mio::Interest::READABLE)
        } else {
            None
        };
        if self.contains(Interest::WRITABLE) {
            interest = Some(match interest {
                Some(i) => i.add(mio::Interest::WRITABLE),
                None => mio::Interest::WRITABLE,
            });
        }
        interest.unwrap_or(mio::Interest::READABLE)
    }
}

/// What kind of slot a [`Token`] refers to. Kept separate from `Interest`
/// because a timer slot has no OS descriptor at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    /// A registered OS descriptor (socket, listener, eventfd, ...).
    Descriptor,
    /// A one-shot timer with no descriptor of its own.
    Timer,
}

/// Bookkeeping the reactor keeps per registered [`Token`]. Holds no
/// reference to the connection or socket it belongs to — the façade keeps
/// its own `Token`-indexed table for that, so the reactor can drop or reuse
/// the slot without needing to know what, if anything, owns it.
#[derive(Debug)]
struct EventRecord {
    kind: EventKind,
    interest: Interest,
}

/// Why a [`Token`] was reported by [`Reactor::poll_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The descriptor became readable.
    Readable,
    /// The descriptor became writable.
    Writable,
    /// The peer closed (half- or full-) the connection.
    Closed,
    /// The descriptor reported an error or hang-up condition.
    Hung,
    /// The token's timer deadline elapsed.
    TimerFired,
    /// The reactor's waker was signaled from another thread.
    UserWake,
}

/// What [`crate::service::Api`]'s dispatch asks the reactor to do with a
/// `Token` after handling a [`Reason`] for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to change; move to the next pending event.
    Continue,
    /// Deregister and drop this token's slot.
    Disconnect,
    /// A `Server`-role accept succeeded; the new peer was registered under
    /// a fresh token this tick and will naturally be polled next tick (it
    /// cannot appear in the event set already consumed by this one).
    Accept,
    /// Restart the dispatch loop from the first pending event of this
    /// tick. Used when handling one event (typically a fired timer)
    /// cascades into a state change — e.g. a disconnect — that later
    /// pending events of the same tick need to observe.
    Reloop,
}

/// Outcome of a single [`Reactor::poll_events`] tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Zero or more events were delivered and dispatched normally.
    Success,
    /// The poll wait elapsed with nothing ready.
    TimedOut,
}

/// The readiness reactor.
#[derive(Debug)]
pub struct Reactor {
    poll: Poll,
    events: Events,
    records: Slab<EventRecord>,
    timers: TimerQueue,
    waker: Option<(Token, std::sync::Arc<Waker>)>,
}

impl Reactor {
    /// Creates a reactor with room for `event_capacity` OS-reported events
    /// per tick (the size of the `mio::Events` buffer, not a cap on the
    /// number of registered descriptors).
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity.max(64)),
            records: Slab::new(),
            timers: TimerQueue::new(),
            waker: None,
        })
    }

    /// Registers a user-facing waker token. `UserWake` is reported through
    /// the same `poll_events` stream as any other readiness event, letting
    /// `interrupt()` be called safely from a different OS thread.
    pub fn enable_waker(&mut self) -> io::Result<std::sync::Arc<Waker>> {
        if let Some((_, waker)) = &self.waker {
            return Ok(waker.clone());
        }
        let entry = self.records.vacant_entry();
        let token = Token(entry.key());
        let waker = std::sync::Arc::new(Waker::new(self.poll.registry(), token)?);
        entry.insert(EventRecord {
            kind: EventKind::Descriptor,
            interest: Interest::READABLE,
        });
        self.waker = Some((token, waker.clone()));
        Ok(waker)
    }

    /// Registers `source` for `interest`, returning the token it was
    /// assigned. The caller keeps its own mapping from this token back to
    /// whatever owns `source`.
    pub fn register(&mut self, source: &mut dyn Source, interest: Interest) -> io::Result<Token> {
        let entry = self.records.vacant_entry();
        let token = Token(entry.key());
        self.poll
            .registry()
            .register(source, token, interest.to_mio())?;
        entry.insert(EventRecord {
            kind: EventKind::Descriptor,
            interest,
        });
        Ok(token)
    }

    /// Changes the interest mask for an already-registered descriptor.
    pub fn modify(&mut self, token: Token, source: &mut dyn Source, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(source, token, interest.to_mio())?;
        if let Some(record) = self.records.get_mut(token.0) {
            record.interest = interest;
        }
        Ok(())
    }

    /// Deregisters a descriptor and frees its token. Idempotent: calling it
    /// on a token already removed (or never registered) is a no-op, so a
    /// stray readiness event drained for a token deleted earlier in the
    /// same tick is silently discarded by `poll_events`/dispatch rather
    /// than causing a double-free or panic.
    pub fn delete(&mut self, token: Token, source: &mut dyn Source) {
        let _ = self.poll.registry().deregister(source);
        if self.records.contains(token.0) {
            self.records.remove(token.0);
        }
        self.timers.cancel(token);
    }

    /// Removes a record without touching an OS registration (used for
    /// descriptor-less timer slots, and for sockets already closed by the
    /// OS so `deregister` would only fail).
    pub fn forget(&mut self, token: Token) {
        if self.records.contains(token.0) {
            self.records.remove(token.0);
        }
        self.timers.cancel(token);
    }

    /// Arms a one-shot timer for `token`, reusing a dedicated slab slot the
    /// first time it's called for that connection and rearming thereafter.
    /// `token` is typically obtained once via [`Reactor::allocate_timer`]
    /// and then reused for the lifetime of the connection it belongs to.
    pub fn set_timer(&mut self, token: Token, timeout: Duration, now: Instant) {
        self.timers.set(token, timeout, now);
    }

    /// Cancels a previously armed timer; safe to call even if it already
    /// fired or was never armed.
    pub fn cancel_timer(&mut self, token: Token) {
        self.timers.cancel(token);
    }

    /// Allocates a dedicated token for a timer with no backing descriptor.
    pub fn allocate_timer(&mut self) -> Token {
        let entry = self.records.vacant_entry();
        let token = Token(entry.key());
        entry.insert(EventRecord {
            kind: EventKind::Timer,
            interest: Interest::empty(),
        });
        token
    }

    /// Polls the OS for readiness and due timers, returning every
    /// `(Token, Reason)` pair observed this tick, in the order `mio`
    /// reported them (timers, which have no OS notification, are appended
    /// after). A descriptor that is both readable and writable appears
    /// twice, once per reason.
    pub fn poll_events(
        &mut self,
        timeout: Option<Duration>,
    ) -> io::Result<(ServiceStatus, Vec<(Token, Reason)>)> {
        let now = Instant::now();
        let wait = match (self.timers.next_expiring_from(now), timeout) {
            (Some(t), Some(cap)) => Some(t.min(cap)),
            (Some(t), None) => Some(t),
            (None, cap) => cap,
        };

        self.poll.poll(&mut self.events, wait)?;

        let mut pending = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            if self
                .records
                .get(token.0)
                .map(|r| r.kind != EventKind::Descriptor)
                .unwrap_or(true)
            {
                continue;
            }
            if Some(token) == self.waker.as_ref().map(|(t, _)| *t) {
                pending.push((token, Reason::UserWake));
                continue;
            }
            if event.is_error() {
                pending.push((token, Reason::Hung));
            }
            if event.is_read_closed() || event.is_write_closed() {
                pending.push((token, Reason::Closed));
            }
            if event.is_readable() {
                pending.push((token, Reason::Readable));
            }
            if event.is_writable() {
                pending.push((token, Reason::Writable));
            }
        }

        let fired = self.timers.pop_expired(Instant::now());
        pending.extend(fired.into_iter().map(|t| (t, Reason::TimerFired)));

        let status = if pending.is_empty() {
            ServiceStatus::TimedOut
        } else {
            ServiceStatus::Success
        };
        Ok((status, pending))
    }

    /// Number of descriptors/timers currently registered. Exposed for
    /// tests and for the façade's shutdown bookkeeping.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_round_trips_through_mio() {
        let both = Interest::READABLE | Interest::WRITABLE;
        let mio_interest = both.to_mio();
        assert!(mio_interest.is_readable());
        assert!(mio_interest.is_writable());
    }

    #[test]
    fn new_reactor_is_empty() {
        let reactor = Reactor::new(16).expect("reactor construction");
        assert!(reactor.is_empty());
    }

    #[test]
    fn timer_token_fires_without_descriptor() {
        let mut reactor = Reactor::new(16).expect("reactor construction");
        let token = reactor.allocate_timer();
        reactor.set_timer(token, Duration::from_millis(0), Instant::now());
        let (status, events) = reactor
            .poll_events(Some(Duration::from_millis(50)))
            .expect("poll");
        assert_eq!(status, ServiceStatus::Success);
        assert_eq!(events, vec![(token, Reason::TimerFired)]);
    }
}
