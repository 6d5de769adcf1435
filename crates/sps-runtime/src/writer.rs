//! Ordered, fire-and-forget persistence.
//!
//! Callers queue [`StoreOp`]s and return immediately; one task applies them
//! in queue order. A failed write is logged and marks the session
//! "unpersisted". It is never retried: the in-memory state stays correct for
//! this process, it just may not survive a restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sps_store::{PersistedStore, StoreOp};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

enum WriterMsg {
    Ops(Vec<StoreOp>),
    Flush(oneshot::Sender<()>),
}

pub struct PersistWriter {
    tx: mpsc::UnboundedSender<WriterMsg>,
    unpersisted: Arc<AtomicBool>,
}

impl PersistWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    ///
    /// The task ends once the writer is dropped and the queue is drained.
    pub fn spawn(store: Arc<dyn PersistedStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterMsg>();
        let unpersisted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&unpersisted);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WriterMsg::Ops(ops) => {
                        for op in ops {
                            if let Err(e) = op.apply(store.as_ref()).await {
                                error!(
                                    keys = ?op.keys(),
                                    error = %e,
                                    "persist failed; state is in-memory only for this session"
                                );
                                flag.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                    WriterMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { tx, unpersisted }
    }

    pub fn submit(&self, ops: Vec<StoreOp>) {
        if ops.is_empty() {
            return;
        }
        if self.tx.send(WriterMsg::Ops(ops)).is_err() {
            warn!("persist writer stopped; write dropped");
            self.mark_unpersisted();
        }
    }

    /// Resolve once every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterMsg::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    pub fn is_unpersisted(&self) -> bool {
        self.unpersisted.load(Ordering::SeqCst)
    }

    pub fn mark_unpersisted(&self) {
        self.unpersisted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset_unpersisted(&self) {
        self.unpersisted.store(false, Ordering::SeqCst);
    }
}
