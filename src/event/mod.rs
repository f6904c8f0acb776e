//! Event management: readable file descriptors, timers and the dispatch loop.

use fxhash::FxHashSet;
use mio::{event::Source, Events, Interest, Poll, Token};
use std::{
    io::{ErrorKind, Result},
    time::{Duration, Instant},
};

mod timer;
pub(crate) use timer::{TimerHandle, TimerQueue};

/// Dispatch target of an [`EventLoop`].
///
/// Timer payloads are typed: whatever context a timer needs is stored in
/// `Timeout` values held by the loop until the deadline.
pub(crate) trait Handler: Sized {
    type Timeout;

    fn readable(&mut self, events: &mut EventLoop<Self>, token: Token) -> Result<()>;
    fn timeout(&mut self, events: &mut EventLoop<Self>, timeout: Self::Timeout) -> Result<()>;
}

/// A single-threaded cooperative event loop over readable sources and
/// absolute-time timers.
///
/// Each turn waits on the poll with a timeout equal to the earliest pending
/// deadline, fires all expired timers in deadline order (ties by insertion
/// order) and then services readable sources. Callbacks run to completion,
/// one at a time; an `Err` from a callback terminates the loop.
pub(crate) struct EventLoop<H: Handler> {
    poll: Poll,
    registered: FxHashSet<Token>,
    timers: TimerQueue<H::Timeout>,
}

impl<H: Handler> EventLoop<H> {
    pub(crate) fn new() -> Result<EventLoop<H>> {
        Ok(EventLoop {
            poll: Poll::new()?,
            registered: FxHashSet::default(),
            timers: TimerQueue::new(),
        })
    }

    pub(crate) fn register<S>(&mut self, source: &mut S, token: Token) -> Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .register(source, token, Interest::READABLE)?;
        self.registered.insert(token);
        Ok(())
    }

    pub(crate) fn deregister<S>(&mut self, source: &mut S, token: Token) -> Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)?;
        self.registered.remove(&token);
        Ok(())
    }

    /// Schedules a single-shot timer `delay` from now.
    pub(crate) fn schedule_in(&mut self, delay: Duration, timeout: H::Timeout) -> TimerHandle {
        self.schedule(Instant::now() + delay, timeout)
    }

    pub(crate) fn schedule(&mut self, deadline: Instant, timeout: H::Timeout) -> TimerHandle {
        self.timers.schedule(deadline, timeout)
    }

    /// Idempotent; a cancelled timer never fires.
    pub(crate) fn cancel(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    /// Runs until no registered sources and no pending timers remain.
    pub(crate) fn run(&mut self, handler: &mut H) -> Result<()> {
        while self.turn(handler, None)? {}
        Ok(())
    }

    /// One dispatch turn. Returns `false` once nothing is registered.
    ///
    /// `cap` bounds the poll wait, which otherwise extends to the earliest
    /// pending deadline (or indefinitely without one).
    pub(crate) fn turn(&mut self, handler: &mut H, cap: Option<Duration>) -> Result<bool> {
        if self.registered.is_empty() && self.timers.is_empty() {
            return Ok(false);
        }

        let mut timeout = self
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        if let Some(cap) = cap {
            timeout = Some(timeout.map_or(cap, |t| t.min(cap)));
        }

        let mut events = Events::with_capacity(16);
        match self.poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(true),
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        while let Some(payload) = self.timers.pop_expired(now) {
            handler.timeout(self, payload)?;
        }

        for event in events.iter() {
            if event.is_readable() {
                handler.readable(self, event.token())?;
            }
        }

        Ok(true)
    }
}
