//! Real-time event source boundary.
//!
//! The transport (publish/subscribe channel, reconnect logic) lives outside
//! this workspace. The engine only consumes its event stream, which may
//! redeliver or reorder events.

use async_trait::async_trait;
use sps_entitlement::RealtimeEvent;
use tokio::sync::mpsc;

/// A stream of named events. `None` means the source is closed for good.
#[async_trait]
pub trait RealtimeEventSource: Send {
    async fn next_event(&mut self) -> Option<RealtimeEvent>;
}

/// Source backed by a tokio channel; the transport (or a test) holds the sender.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<RealtimeEvent>,
}

impl ChannelEventSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<RealtimeEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl RealtimeEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }
}
