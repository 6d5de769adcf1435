//! EntitlementController: the single owner of the in-memory entitlement state.
//!
//! Every mutation takes the core lock, updates memory, queues the matching
//! durable write, then publishes a [`StateChange`]. Reads never touch storage.

use std::sync::Arc;

use serde_json::Value;
use sps_config::EngineConfig;
use sps_entitlement::{
    can_access_catalogue, can_access_channel, reconcile, AccessDecision, ChannelId, ChannelRef,
    ClockSource, Countdown, CountdownPhase, Effect, EntitlementPolicy, EntitlementState,
    GrantEvent, MalformedEvent, RealtimeEvent, Reconciled, RemainingTime, TickOutcome,
    UnlockMode, WatchedChannel, MS_PER_MINUTE, SUBSCRIBED_EVENTS,
};
use sps_store::{codec, keys, PersistedStore, StoreOp};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::observer::{render_remaining, ChangeKind, EntitlementSnapshot, StateChange};
use crate::scheduler::{CountdownScheduler, TaskSlot};
use crate::source::RealtimeEventSource;
use crate::writer::PersistWriter;

const BUS_CAPACITY: usize = 256;

/// How boot resolved the persisted session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootOutcome {
    /// No full-access grant was stored.
    NoSession,
    /// A live session was restored; the countdown runs to `expires_at`.
    Resumed { expires_at: i64 },
    /// The stored session had already lapsed and was cleared.
    Expired { expires_at: i64 },
    /// The stored expiry was implausibly far ahead of the local clock and was
    /// cleared rather than trusted.
    ClockSkew { expires_at: i64 },
    /// The batch read failed; running on empty in-memory state.
    StorageUnavailable,
}

/// Result of feeding one real-time event to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Applied { minutes: i64, expires_at: i64 },
    /// Server-side revocation, or a grant whose end was already past.
    Expired,
    /// Unknown event name.
    Ignored,
    Malformed(MalformedEvent),
}

struct Core {
    state: EntitlementState,
    countdown: Countdown,
}

pub(crate) struct Shared {
    core: RwLock<Core>,
    store: Arc<dyn PersistedStore>,
    clock: Arc<dyn ClockSource>,
    writer: PersistWriter,
    scheduler: CountdownScheduler,
    pump: TaskSlot,
    bus: broadcast::Sender<StateChange>,
    policy: EntitlementPolicy,
}

/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct EntitlementController {
    shared: Arc<Shared>,
}

impl EntitlementController {
    /// Build a controller with empty state. Call [`Self::boot`] to restore.
    ///
    /// Spawns the persistence writer, so it must run inside a tokio runtime.
    pub fn new(
        store: Arc<dyn PersistedStore>,
        clock: Arc<dyn ClockSource>,
        config: &EngineConfig,
    ) -> Self {
        let policy = config.policy();
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        let shared = Shared {
            core: RwLock::new(Core {
                state: EntitlementState::empty(),
                countdown: Countdown::new(policy.checkpoint_every_ticks),
            }),
            writer: PersistWriter::spawn(Arc::clone(&store)),
            store,
            clock,
            scheduler: CountdownScheduler::new(config.tick_period()),
            pump: TaskSlot::default(),
            bus,
            policy,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Restore from the persisted store.
    ///
    /// The countdown is seeded from the stored absolute expiry, never from
    /// the cached `remainingTime`. If either stored grant has lapsed, or
    /// either expiry is implausibly far ahead, both grants are cleared before
    /// any access decision can see them. Temporary unlocks start empty.
    pub async fn boot(&self) -> BootOutcome {
        let sh = &self.shared;
        sh.writer.reset_unpersisted();

        let read = sh.store.multi_get(keys::ALL).await;
        let now = sh.clock.now_ms();

        let mut core = sh.core.write().await;
        core.countdown.stop();
        sh.scheduler.stop();

        let values = match read {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "boot read failed; continuing with empty in-memory state");
                sh.writer.mark_unpersisted();
                core.state = EntitlementState::empty();
                sh.emit(&core, ChangeKind::Restored);
                return BootOutcome::StorageUnavailable;
            }
        };

        let restored = codec::decode(&values);
        for problem in &restored.problems {
            warn!(problem = %problem, "dropped unreadable persisted value");
        }
        core.state = restored.state;
        core.state.is_subscribed = core.state.subscription_end_at.is_some_and(|end| end > now);

        let horizon = now.saturating_add(sh.policy.clock_skew_horizon_ms);
        let ends = core.state.session_expires_at();
        let outcome = match (ends, core.state.latest_grant_expiry()) {
            (None, _) | (_, None) => BootOutcome::NoSession,
            (Some(_), Some(end)) if end > horizon => {
                warn!(
                    expires_at = end,
                    now_ms = now,
                    "restored expiry beyond clock skew horizon; treating session as expired"
                );
                sh.expire_locked(&mut core);
                BootOutcome::ClockSkew { expires_at: end }
            }
            (Some(end), _) if core.state.session_lapsed_at(now) => {
                info!(expires_at = end, "restored grant already lapsed; clearing session");
                sh.expire_locked(&mut core);
                BootOutcome::Expired { expires_at: end }
            }
            (Some(end), _) => {
                sh.start_countdown(&mut core, end, now);
                info!(
                    expires_at = end,
                    cached_remaining_minutes = ?restored.cached_remaining_minutes,
                    "session restored"
                );
                BootOutcome::Resumed { expires_at: end }
            }
        };

        sh.emit(&core, ChangeKind::Restored);
        outcome
    }

    /// Consume `source` on a background task, forwarding subscribed events to
    /// [`Self::grant`]. Replaces any previously attached source.
    pub fn attach_event_source<S>(&self, source: S)
    where
        S: RealtimeEventSource + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.shared.pump.replace_with(move || {
            tokio::spawn(async move {
                let mut source = source;
                while let Some(event) = source.next_event().await {
                    if !SUBSCRIBED_EVENTS.contains(&event.name.as_str()) {
                        debug!(event = %event.name, "ignoring unsubscribed event");
                        continue;
                    }
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    EntitlementController { shared }.grant(event).await;
                }
                debug!("realtime event source closed");
            })
        });
    }

    /// Stop background tasks and wait for queued writes to land.
    pub async fn shutdown(&self) {
        self.shared.pump.abort();
        self.shared.scheduler.stop();
        self.shared.core.write().await.countdown.stop();
        self.shared.writer.flush().await;
    }

    /// Resolve once every write queued so far has been attempted.
    pub async fn flush(&self) {
        self.shared.writer.flush().await;
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<StateChange> {
        self.shared.bus.subscribe()
    }

    // -----------------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------------

    /// Apply one real-time event. Never fails: malformed and unknown events
    /// are logged and leave the state unchanged.
    pub async fn grant(&self, event: RealtimeEvent) -> GrantOutcome {
        let sh = &self.shared;
        let now = sh.clock.now_ms();

        let parsed = match GrantEvent::parse(&event, now, sh.policy.days_per_month) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!(event = %event.name, "unknown event ignored");
                return GrantOutcome::Ignored;
            }
            Err(e) => {
                warn!(error = %e, "malformed event dropped");
                return GrantOutcome::Malformed(e);
            }
        };

        let mut core = sh.core.write().await;
        let Reconciled { state, effects } = reconcile(&core.state, &parsed, now);
        core.state = state;

        let mut granted = None;
        let mut cleared = false;
        for effect in effects {
            match effect {
                Effect::PersistSubscription => sh.writer.submit(codec::subscription_ops(&core.state)),
                Effect::PersistAdminGrant => sh.writer.submit(codec::admin_grant_ops(&core.state)),
                Effect::ClearSession => {
                    sh.writer.submit(codec::clear_session_ops());
                    cleared = true;
                }
                Effect::RestartCountdown { expires_at } => {
                    sh.start_countdown(&mut core, expires_at, now)
                }
                Effect::StopCountdown => {
                    core.countdown.stop();
                    sh.scheduler.stop();
                }
                Effect::NotifyGranted { minutes } => granted = Some(minutes),
            }
        }

        match (granted, core.state.session_expires_at()) {
            (Some(minutes), Some(expires_at)) => {
                info!(event = %event.name, minutes, expires_at, "access granted");
                sh.emit(&core, ChangeKind::Granted { minutes });
                GrantOutcome::Applied {
                    minutes,
                    expires_at,
                }
            }
            _ if cleared => {
                info!(event = %event.name, "session expired by server event");
                sh.emit(&core, ChangeKind::Expired);
                GrantOutcome::Expired
            }
            _ => GrantOutcome::Ignored,
        }
    }

    /// Drive one countdown tick against the current timer generation.
    ///
    /// The background task does this every tick period; tests call it
    /// directly to step the countdown deterministically.
    pub async fn tick(&self) -> TickOutcome {
        let generation = self.shared.core.read().await.countdown.generation();
        self.shared.on_tick(generation).await
    }

    // -----------------------------------------------------------------------
    // Access decisions
    // -----------------------------------------------------------------------

    pub async fn can_access_catalogue(&self) -> AccessDecision {
        let now = self.shared.clock.now_ms();
        let core = self.shared.core.read().await;
        can_access_catalogue(&core.state, now)
    }

    pub async fn can_access_channel(&self, channel: &ChannelRef) -> AccessDecision {
        let now = self.shared.clock.now_ms();
        let core = self.shared.core.read().await;
        can_access_channel(&core.state, channel, now)
    }

    pub async fn remaining(&self) -> Option<RemainingTime> {
        let now = self.shared.clock.now_ms();
        let core = self.shared.core.read().await;
        core.state
            .session_remaining_ms(now)
            .map(RemainingTime::from_ms)
    }

    /// "Nd Nh Nm", "Nh Nm", "Nm Ns", or "expired".
    pub async fn format_remaining(&self) -> String {
        render_remaining(self.remaining().await)
    }

    // -----------------------------------------------------------------------
    // Points and unlocks
    // -----------------------------------------------------------------------

    /// Credit points; returns the new balance.
    pub async fn award_points(&self, amount: u64, source: &str) -> u64 {
        let sh = &self.shared;
        let now = sh.clock.now_ms();
        let mut core = sh.core.write().await;
        let balance =
            core.state
                .award_points(amount, source, now, sh.policy.points_history_cap);
        sh.writer.submit(codec::points_ops(&core.state));
        sh.emit(&core, ChangeKind::PointsChanged);
        balance
    }

    /// Debit points. `false` (state untouched) when the balance does not cover it.
    pub async fn spend_points(&self, amount: u64, purpose: &str) -> bool {
        let sh = &self.shared;
        let now = sh.clock.now_ms();
        let mut core = sh.core.write().await;
        match core
            .state
            .spend_points(amount, purpose, now, sh.policy.points_history_cap)
        {
            Ok(_) => {
                sh.writer.submit(codec::points_ops(&core.state));
                sh.emit(&core, ChangeKind::PointsChanged);
                true
            }
            Err(e) => {
                info!(error = %e, purpose, "spend rejected");
                false
            }
        }
    }

    /// Spend `cost` points and unlock `channel` in one step. `purpose` is
    /// recorded as the points-history source.
    ///
    /// A channel that is already unlocked at least as strongly as `mode`
    /// asks is not charged again.
    pub async fn unlock_channel_with_points(
        &self,
        channel: &ChannelId,
        cost: u64,
        mode: UnlockMode,
        purpose: &str,
    ) -> bool {
        let sh = &self.shared;
        let now = sh.clock.now_ms();
        let mut core = sh.core.write().await;

        let already = match mode {
            UnlockMode::Permanent => core.state.permanent_unlocked.contains(channel),
            UnlockMode::Temporary => core.state.is_points_unlocked(channel),
        };
        if already {
            debug!(channel = %channel, ?mode, "channel already unlocked; not charged");
            return true;
        }

        if let Err(e) = core
            .state
            .spend_points(cost, purpose, now, sh.policy.points_history_cap)
        {
            info!(error = %e, channel = %channel, "unlock rejected");
            return false;
        }

        let mut ops = codec::points_ops(&core.state);
        match mode {
            UnlockMode::Permanent => {
                core.state.unlock_permanent(channel.clone());
                ops.extend(codec::unlocked_ops(&core.state));
            }
            UnlockMode::Temporary => {
                core.state.unlock_temporary(channel.clone());
            }
        }
        sh.writer.submit(ops);
        sh.emit(&core, ChangeKind::UnlocksChanged);
        true
    }

    pub async fn unlock_channel_permanently(&self, channel: &ChannelId) -> bool {
        self.mutate_unlocks(|st| st.unlock_permanent(channel.clone()), true)
            .await
    }

    pub async fn lock_channel_permanently(&self, channel: &ChannelId) -> bool {
        self.mutate_unlocks(|st| st.lock_permanent(channel), true)
            .await
    }

    /// Process-lifetime unlock; gone after the next cold start.
    pub async fn unlock_channel_temporarily(&self, channel: &ChannelId) -> bool {
        self.mutate_unlocks(|st| st.unlock_temporary(channel.clone()), false)
            .await
    }

    pub async fn lock_channel_temporarily(&self, channel: &ChannelId) -> bool {
        self.mutate_unlocks(|st| st.lock_temporary(channel), false)
            .await
    }

    async fn mutate_unlocks<F>(&self, f: F, persist: bool) -> bool
    where
        F: FnOnce(&mut EntitlementState) -> bool,
    {
        let sh = &self.shared;
        let mut core = sh.core.write().await;
        let changed = f(&mut core.state);
        if changed {
            if persist {
                sh.writer.submit(codec::unlocked_ops(&core.state));
            }
            sh.emit(&core, ChangeKind::UnlocksChanged);
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Histories, trial, profile
    // -----------------------------------------------------------------------

    pub async fn record_watch(&self, channel: WatchedChannel) {
        let sh = &self.shared;
        let now = sh.clock.now_ms();
        let mut core = sh.core.write().await;
        core.state
            .record_watch(channel, now, sh.policy.watch_history_cap);
        sh.writer.submit(codec::watch_history_ops(&core.state));
        sh.emit(&core, ChangeKind::HistoryChanged);
    }

    /// Update the most recent watch entry for `channel`. `false` when none exists.
    pub async fn update_watch_duration(&self, channel: &ChannelId, secs: u64) -> bool {
        let sh = &self.shared;
        let now = sh.clock.now_ms();
        let mut core = sh.core.write().await;
        let found = core.state.update_watch_duration(channel, secs, now);
        if found {
            sh.writer.submit(codec::watch_history_ops(&core.state));
            sh.emit(&core, ChangeKind::HistoryChanged);
        }
        found
    }

    pub async fn mark_trial_used(&self) {
        let sh = &self.shared;
        let mut core = sh.core.write().await;
        if core.state.trial_used {
            return;
        }
        core.state.trial_used = true;
        sh.writer.submit(codec::trial_ops(&core.state));
        sh.emit(&core, ChangeKind::ProfileChanged);
    }

    pub async fn has_used_trial(&self) -> bool {
        self.shared.core.read().await.state.trial_used
    }

    pub async fn update_user_profile(&self, profile: Value) {
        let sh = &self.shared;
        let mut core = sh.core.write().await;
        core.state.user_profile = Some(profile);
        sh.writer.submit(codec::user_ops(&core.state));
        sh.emit(&core, ChangeKind::ProfileChanged);
    }

    pub async fn user_profile(&self) -> Option<Value> {
        self.shared.core.read().await.state.user_profile.clone()
    }

    /// Logout: drop everything, in memory and on disk.
    pub async fn clear_all(&self) {
        let sh = &self.shared;
        let mut core = sh.core.write().await;
        core.countdown.stop();
        sh.scheduler.stop();
        core.state = EntitlementState::empty();
        sh.writer.submit(vec![StoreOp::RemoveMany {
            keys: keys::ALL.to_vec(),
        }]);
        info!("entitlement state cleared");
        sh.emit(&core, ChangeKind::Cleared);
    }

    // -----------------------------------------------------------------------
    // Read model
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self) -> EntitlementSnapshot {
        let sh = &self.shared;
        let core = sh.core.read().await;
        sh.snapshot_locked(&core)
    }

    pub async fn state(&self) -> EntitlementState {
        self.shared.core.read().await.state.clone()
    }

    pub async fn points_balance(&self) -> u64 {
        self.shared.core.read().await.state.points_balance
    }

    pub async fn countdown_phase(&self) -> CountdownPhase {
        self.shared.core.read().await.countdown.phase()
    }

    /// `true` once any durable write failed since the last boot.
    pub fn is_unpersisted(&self) -> bool {
        self.shared.writer.is_unpersisted()
    }
}

impl Shared {
    fn snapshot_locked(&self, core: &Core) -> EntitlementSnapshot {
        EntitlementSnapshot::capture(
            &core.state,
            core.countdown.phase(),
            self.clock.now_ms(),
            self.writer.is_unpersisted(),
        )
    }

    fn emit(&self, core: &Core, kind: ChangeKind) {
        let snapshot = self.snapshot_locked(core);
        // No receivers is fine.
        let _ = self.bus.send(StateChange { kind, snapshot });
    }

    /// The session-expired transition, in memory then on disk.
    fn expire_locked(&self, core: &mut Core) {
        core.state.clear_session();
        self.writer.submit(codec::clear_session_ops());
    }

    fn start_countdown(self: &Arc<Self>, core: &mut Core, expires_at: i64, now: i64) {
        let generation = core.countdown.start(expires_at);
        let remaining_minutes = (expires_at - now).max(0) / MS_PER_MINUTE;
        self.writer
            .submit(codec::checkpoint_ops(&mut core.state, remaining_minutes));

        let weak = Arc::downgrade(self);
        self.scheduler.start(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(shared) => !matches!(
                        shared.on_tick(generation).await,
                        TickOutcome::Stale | TickOutcome::Expired
                    ),
                    None => false,
                }
            }
        });
        debug!(expires_at, generation, "countdown started");
    }

    async fn on_tick(&self, generation: u64) -> TickOutcome {
        let now = self.clock.now_ms();
        let mut core = self.core.write().await;
        let outcome = core.countdown.tick(generation, now);
        match outcome {
            TickOutcome::Stale | TickOutcome::Continue { .. } => {}
            TickOutcome::Checkpoint {
                remaining_minutes, ..
            } => {
                let ops = codec::checkpoint_ops(&mut core.state, remaining_minutes);
                self.writer.submit(ops);
                debug!(remaining_minutes, "countdown checkpoint");
            }
            TickOutcome::Expired => {
                info!("session expired by countdown");
                self.expire_locked(&mut core);
                self.emit(&core, ChangeKind::Expired);
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
