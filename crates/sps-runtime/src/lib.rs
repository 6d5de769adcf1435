//! sps-runtime
//!
//! Orchestration of the entitlement core: boot/restore from the persisted
//! store, the 1-second countdown task, the ordered persistence writer, the
//! real-time event pump and the state-change bus.
//!
//! Ordering guarantees:
//! - In-memory state is updated BEFORE the matching write is queued.
//! - Writes are applied in the order they were queued, by a single task.
//! - Starting a countdown cancels the previous timer before the new one is
//!   installed; a late tick from the old timer is recognised as stale.
//!
//! Storage and event failures stop at this boundary. They are logged and
//! degrade to "no access change", never to a panic or default access.

mod controller;
mod observer;
mod scheduler;
mod source;
mod writer;

pub use controller::{BootOutcome, EntitlementController, GrantOutcome};
pub use observer::{ChangeKind, EntitlementSnapshot, StateChange};
pub use source::{ChannelEventSource, RealtimeEventSource};
pub use writer::PersistWriter;
