//! Countdown timer task.
//!
//! One task at a time. Restarting aborts the previous task before spawning
//! the next one; a tick already in flight from the aborted task is dropped by
//! the generation check in [`sps_entitlement::Countdown::tick`].

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owns at most one background task; aborts it on replace and on drop.
#[derive(Default)]
pub(crate) struct TaskSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    /// Abort the current task (if any), then install the one built by `spawn`.
    pub(crate) fn replace_with(&self, spawn: impl FnOnce() -> JoinHandle<()>) {
        let mut slot = match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        *slot = Some(spawn());
    }

    pub(crate) fn abort(&self) {
        let mut slot = match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = slot.take() {
            prev.abort();
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.abort();
    }
}

pub(crate) struct CountdownScheduler {
    period: Duration,
    task: TaskSlot,
}

impl CountdownScheduler {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            task: TaskSlot::default(),
        }
    }

    /// Call `on_tick` every period until it returns `false`.
    ///
    /// The first tick fires one full period after start.
    pub(crate) fn start<F, Fut>(&self, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let period = self.period;
        self.task.replace_with(move || {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !on_tick().await {
                        break;
                    }
                }
            })
        });
    }

    pub(crate) fn stop(&self) {
        self.task.abort();
    }
}
