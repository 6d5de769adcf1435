//! sps-entitlement
//!
//! Client-side entitlement core.
//!
//! Architectural decisions:
//! - Four independent access sources: subscription, admin grant, permanent
//!   points unlock, temporary points unlock
//! - Server events REPLACE the stored expiry, never add to it
//! - Expiry is always derived from an absolute timestamp, never a counter
//! - Temporary unlocks never reach durable storage
//! - Any ambiguity denies access (fail-closed)
//!
//! Pure deterministic logic. No IO, no wall-clock reads except through
//! [`ClockSource`]. The runtime crate owns persistence and timers.

mod access;
mod clock;
mod countdown;
mod event;
mod reconcile;
mod remaining;
mod state;
mod transient;
mod types;

pub use access::{can_access_catalogue, can_access_channel, AccessDecision, AccessReason};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use countdown::{Countdown, CountdownPhase, TickOutcome};
pub use event::{
    AdminAttribution, DurationUnit, GrantEvent, GrantKind, GrantPayload, MalformedEvent,
    RealtimeEvent, SUBSCRIBED_EVENTS,
};
pub use reconcile::{reconcile, Effect, Reconciled};
pub use remaining::RemainingTime;
pub use state::{EntitlementState, InsufficientPoints};
pub use transient::TransientUnlockCache;
pub use types::*;
