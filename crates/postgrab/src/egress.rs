//! Process-wide egress switch between the direct path and the routed (proxy) path.
//!
//! The switch flips to [`EgressMode::Routed`] when the upstream starts rate limiting
//! and falls back to [`EgressMode::Direct`] once a cooldown has elapsed since the most
//! recent activation. Re-activating while routed pushes the deadline out instead of
//! stacking timers, so a burst of 429s keeps the proxy engaged for one cooldown past
//! the last of them.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Source of "now" for cooldown bookkeeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressMode {
    Direct,
    Routed,
}

impl fmt::Display for EgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressMode::Direct => f.write_str("direct"),
            EgressMode::Routed => f.write_str("routed"),
        }
    }
}

/// Shared handle to the egress state. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct EgressController {
    // Deadline at which routed mode reverts; `None` while direct.
    routed_until: Arc<Mutex<Option<Instant>>>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl EgressController {
    pub fn new(cooldown: Duration) -> Self {
        Self::with_clock(cooldown, Arc::new(SystemClock))
    }

    pub fn with_clock(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            routed_until: Arc::new(Mutex::new(None)),
            cooldown,
            clock,
        }
    }

    /// Switch to routed mode and (re)arm the reversion deadline.
    pub fn activate(&self) {
        let now = self.clock.now();
        let deadline = now + self.cooldown;
        let mut routed_until = self.routed_until.lock();
        let was_routed = routed_until.is_some_and(|until| now < until);
        *routed_until = Some(deadline);
        drop(routed_until);

        if was_routed {
            debug!(cooldown = ?self.cooldown, "Rate limited while routed; cooldown re-armed");
        } else {
            info!(cooldown = ?self.cooldown, "Rate limited; routing requests through proxy");
        }
    }

    pub fn current_mode(&self) -> EgressMode {
        let now = self.clock.now();
        match *self.routed_until.lock() {
            Some(until) if now < until => EgressMode::Routed,
            _ => EgressMode::Direct,
        }
    }

    /// Time left before routed mode reverts, if currently routed.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.routed_until
            .lock()
            .and_then(|until| until.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }
}
