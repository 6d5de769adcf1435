//! Countdown state machine: `Idle → Running → Expired`.
//!
//! # Invariants
//!
//! - **Absolute, not decremented**: every tick recomputes
//!   `remaining = expires_at - now`. Delayed or skipped ticks (host suspended)
//!   cannot drift the countdown.
//! - **One live instance**: `start` bumps the generation. A tick carrying an
//!   older generation is [`TickOutcome::Stale`] and changes nothing, so a
//!   superseded timer can never write a checkpoint or fire an expiry.
//! - **Expired is final**: once expired, ticks are stale until the next
//!   `start`.
//! - **Bounded checkpoints**: a checkpoint is requested every
//!   `checkpoint_every` ticks, never more often.
//!
//! Pure; the runtime drives it from a timer and performs the IO.

use crate::MS_PER_MINUTE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownPhase {
    Idle,
    Running,
    Expired,
}

/// What the runtime must do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick from a superseded or stopped countdown; ignore it.
    Stale,
    /// Still running; nothing to write.
    Continue { remaining_ms: i64 },
    /// Still running; write the display cache.
    Checkpoint {
        remaining_ms: i64,
        remaining_minutes: i64,
    },
    /// Reached zero on this tick; run the session-expired transition.
    Expired,
}

#[derive(Clone, Debug)]
pub struct Countdown {
    phase: CountdownPhase,
    expires_at: Option<i64>,
    generation: u64,
    ticks: u64,
    checkpoint_every: u64,
}

impl Countdown {
    pub fn new(checkpoint_every: u64) -> Self {
        Self {
            phase: CountdownPhase::Idle,
            expires_at: None,
            generation: 0,
            ticks: 0,
            checkpoint_every: checkpoint_every.max(1),
        }
    }

    /// Supersede whatever was running. Returns the new generation, which the
    /// timer must hand back on every tick.
    pub fn start(&mut self, expires_at: i64) -> u64 {
        self.generation += 1;
        self.phase = CountdownPhase::Running;
        self.expires_at = Some(expires_at);
        self.ticks = 0;
        self.generation
    }

    /// Idempotent. In-flight ticks of the stopped instance become stale.
    pub fn stop(&mut self) {
        if self.phase == CountdownPhase::Running {
            self.generation += 1;
        }
        self.phase = CountdownPhase::Idle;
        self.expires_at = None;
        self.ticks = 0;
    }

    pub fn tick(&mut self, generation: u64, now_ms: i64) -> TickOutcome {
        if generation != self.generation || self.phase != CountdownPhase::Running {
            return TickOutcome::Stale;
        }
        let Some(expires_at) = self.expires_at else {
            return TickOutcome::Stale;
        };

        let remaining_ms = expires_at - now_ms;
        if remaining_ms <= 0 {
            self.phase = CountdownPhase::Expired;
            return TickOutcome::Expired;
        }

        self.ticks += 1;
        if self.ticks % self.checkpoint_every == 0 {
            TickOutcome::Checkpoint {
                remaining_ms,
                remaining_minutes: remaining_ms / MS_PER_MINUTE,
            }
        } else {
            TickOutcome::Continue { remaining_ms }
        }
    }

    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == CountdownPhase::Running
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
