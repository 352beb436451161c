//! Scoped timers for one stage run.
//!
//! A stage owns at most one live countdown per [`TimerScope`].  All of them
//! report into a single channel as [`TimerSignal`]s, which the stage's event
//! loop consumes alongside applicant actions.
//!
//! When several scopes expire in the same tick the broadest one wins
//! (`Session > Stage > Unit`): [`TimerSet::resolve`] folds every pending
//! expiry into one verdict, so a narrower expiry is never dispatched as a
//! separate event once a broader one has fired.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use super::countdown::{self, TimerHandle};

/// Timer scope, ordered by priority (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerScope {
    /// One unit's answer window (e.g. 60 s per recorded answer).
    Unit,
    /// Whole-form deadline for timed forms and the typing test.
    Stage,
    /// Overall cap for the capture stages.
    Session,
}

/// Generation number of a timer started through a [`TimerSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Signal delivered by a scoped countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick {
        scope: TimerScope,
        timer: TimerId,
        remaining: u32,
    },
    Expired {
        scope: TimerScope,
        timer: TimerId,
    },
}

/// The live countdowns of one stage run.
///
/// Dropping the set cancels everything still running.
pub struct TimerSet {
    live: HashMap<TimerScope, (TimerId, TimerHandle)>,
    next_id: u64,
    tx: mpsc::UnboundedSender<TimerSignal>,
}

impl TimerSet {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let set = Self {
            live: HashMap::new(),
            next_id: 0,
            tx,
        };
        (set, rx)
    }

    /// Start a full-duration countdown for `scope`, replacing (and
    /// cancelling) any countdown already live in that scope.
    pub fn start(&mut self, scope: TimerScope, secs: u32) -> TimerId {
        self.cancel(scope);

        self.next_id += 1;
        let id = TimerId(self.next_id);

        let tick_tx = self.tx.clone();
        let expire_tx = self.tx.clone();
        let handle = countdown::create(
            secs,
            move |remaining| {
                let _ = tick_tx.send(TimerSignal::Tick {
                    scope,
                    timer: id,
                    remaining,
                });
            },
            move || {
                let _ = expire_tx.send(TimerSignal::Expired { scope, timer: id });
            },
        );

        log::debug!("timer: {scope:?} started for {secs}s");
        self.live.insert(scope, (id, handle));
        id
    }

    /// Cancel the countdown in `scope`.  Returns `true` if one was running.
    pub fn cancel(&mut self, scope: TimerScope) -> bool {
        match self.live.remove(&scope) {
            Some((_, mut handle)) => handle.cancel(),
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, mut handle)) in self.live.drain() {
            handle.cancel();
        }
    }

    pub fn is_live(&self, scope: TimerScope) -> bool {
        self.live.contains_key(&scope)
    }

    /// `true` when `timer` is the countdown currently live in `scope`.
    /// Signals from replaced or cancelled timers fail this check.
    pub fn is_current(&self, scope: TimerScope, timer: TimerId) -> bool {
        matches!(self.live.get(&scope), Some((id, _)) if *id == timer)
    }

    pub fn remaining(&self, scope: TimerScope) -> Option<u32> {
        self.live.get(&scope).map(|(_, h)| h.remaining_secs())
    }

    /// Decide which scope an expiry stands for.
    ///
    /// Accepts the expiry of `timer` plus any other expiry already queued in
    /// `rx`, drops stale ones, and returns the broadest scope that actually
    /// expired.  Every accepted scope is removed from the set.  Queued ticks
    /// are discarded: they are superseded by the expiry being handled.
    pub async fn resolve(
        &mut self,
        scope: TimerScope,
        timer: TimerId,
        rx: &mut mpsc::UnboundedReceiver<TimerSignal>,
    ) -> Option<TimerScope> {
        let mut winner = self.accept(scope, timer).then_some(scope);

        // Let countdowns woken in the same tick deliver their expiry first.
        tokio::task::yield_now().await;

        while let Ok(signal) = rx.try_recv() {
            if let TimerSignal::Expired { scope, timer } = signal {
                if self.accept(scope, timer) {
                    winner = winner.max(Some(scope));
                }
            }
        }

        if let Some(scope) = winner {
            log::debug!("timer: {scope:?} expired");
        }
        winner
    }

    fn accept(&mut self, scope: TimerScope, timer: TimerId) -> bool {
        if self.is_current(scope, timer) {
            self.live.remove(&scope);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
