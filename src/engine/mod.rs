//! Engine - reconciliation of smart account, injected wallet and store
//!
//! ```text
//!  bus events ──► dirty ──(debounce window)──┐
//!  poll (every poll_ms) ─────────────────────┤
//!  verify (one window after acting) ─────────┼──► pass ──► plan(snapshot)
//!  upgrade result ready ─────────────────────┘        │
//!                                                     ├── force loser / persist / broadcast / retract
//!                                                     └── converged? maybe start an upgrade attempt
//! ```
//!
//! There is exactly one pass routine and it is the only engine path that
//! writes the store. Time is logical: whoever drives the engine calls
//! `advance(elapsed)`, so the debounce and poll are deterministic in tests.
//!
//! | Trigger | When |
//! |---------|------|
//! | `Event` | debounce window elapsed since the last non-engine event |
//! | `Verify` | one window after a pass that acted |
//! | `Upgrade` | an attempt finished, or a spaced retry is due |
//! | `Poll` | `poll_ms` without any pass, even while events keep the window open |
//! | `Retry` | previous pass aborted on a storage error |

pub mod plan;
mod upgrade;

pub use plan::{plan, Action, NodeView, Snapshot};

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::bus::{Bus, EventFlags, Source, Subscription, SyncEvent, UserNotice};
use crate::context::{Capability, ProviderNode};
use crate::core::{WalletError, WalletResult};
use crate::node::SyncConfig;
use crate::session::{SessionStore, WalletSession};
use upgrade::{UpgradeBudget, UpgradeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Event,
    Verify,
    Upgrade,
    Poll,
    Retry,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub trigger: Trigger,
    pub at_ms: u64,
    pub actions: Vec<Action>,
    /// Session-record writes made by this pass.
    pub writes: u64,
    /// Bus events published by this pass.
    pub published: u64,
    pub upgrade_started: bool,
    pub upgrade_applied: bool,
    /// Snapshot matched the last settled one; planning skipped.
    pub skipped: bool,
    pub error: Option<String>,
}

impl PassReport {
    fn new(trigger: Trigger, at_ms: u64) -> Self {
        Self {
            trigger,
            at_ms,
            actions: Vec::new(),
            writes: 0,
            published: 0,
            upgrade_started: false,
            upgrade_applied: false,
            skipped: false,
            error: None,
        }
    }

    pub fn acted(&self) -> bool { !self.actions.is_empty() || self.upgrade_applied }
}

#[derive(Default)]
struct Schedule {
    now_ms: u64,
    dirty_at: Option<u64>,
    last_pass_ms: u64,
    verify_at: Option<u64>,
    retry_at: Option<u64>,
    retry: bool,
    settled: Option<Snapshot>,
    upgrade: UpgradeBudget,
    task: Option<JoinHandle<()>>,
    passes: u64,
}

struct EngineInner {
    store: SessionStore,
    nodes: Vec<Arc<dyn ProviderNode>>,
    config: SyncConfig,
    schedule: Mutex<Schedule>,
    pass_lock: Mutex<()>,
    subscription: Mutex<Option<Subscription>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl EngineInner {
    fn schedule(&self) -> MutexGuard<'_, Schedule> { lock(&self.schedule) }

    fn on_event(&self, event: &SyncEvent) {
        if event.source_provider == Source::Engine {
            return;
        }
        let mut s = self.schedule();
        tracing::debug!(seq = event.seq, kind = ?event.kind, at = s.now_ms, "engine marked dirty");
        s.dirty_at = Some(s.now_ms);
    }

    fn finish_upgrade(&self, result: UpgradeResult) {
        let mut s = self.schedule();
        if s.upgrade.epoch != result.epoch {
            tracing::debug!(attempt = result.attempt, "dropping upgrade result from an earlier session");
            return;
        }
        s.upgrade.in_flight = false;
        s.upgrade.result = Some(result);
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// `nodes` order is the capability-source order for upgrades.
    pub fn new(store: SessionStore, nodes: Vec<Arc<dyn ProviderNode>>, config: SyncConfig) -> Self {
        let schedule = Schedule { dirty_at: Some(0), upgrade: UpgradeBudget { epoch: store.epoch(), ..Default::default() }, ..Default::default() };
        let inner = Arc::new(EngineInner {
            store,
            nodes,
            config,
            schedule: Mutex::new(schedule),
            pass_lock: Mutex::new(()),
            subscription: Mutex::new(None),
        });
        let weak: Weak<EngineInner> = Arc::downgrade(&inner);
        let sub = inner.store.bus().subscribe_all(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(event);
            }
        });
        *lock(&inner.subscription) = Some(sub);
        tracing::info!(
            nodes = inner.nodes.len(),
            debounce_ms = inner.config.debounce_ms,
            poll_ms = inner.config.poll_ms,
            "reconciliation engine started"
        );
        Self { inner }
    }

    pub fn store(&self) -> &SessionStore { &self.inner.store }

    pub fn bus(&self) -> &Bus { self.inner.store.bus() }

    pub fn config(&self) -> &SyncConfig { &self.inner.config }

    pub fn now_ms(&self) -> u64 { self.inner.schedule().now_ms }

    pub fn pass_count(&self) -> u64 { self.inner.schedule().passes }

    pub fn upgrade_attempts(&self) -> u32 { self.inner.schedule().upgrade.attempts }

    pub fn upgrade_in_flight(&self) -> bool { self.inner.schedule().upgrade.in_flight }

    /// Wait for the spawned upgrade attempt, if any. Its result is applied
    /// by the next pass.
    pub async fn join_upgrade(&self) {
        let task = self.inner.schedule().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "upgrade task ended abnormally");
            }
        }
    }

    /// Move logical time forward and run a pass if one is due.
    pub fn advance(&self, elapsed: Duration) -> Option<PassReport> {
        let debounce = self.inner.config.debounce_ms;
        let poll = self.inner.config.poll_ms;
        let trigger = {
            let mut s = self.inner.schedule();
            s.now_ms = s.now_ms.saturating_add(elapsed.as_millis() as u64);
            let now = s.now_ms;
            if s.retry {
                Trigger::Retry
            } else if let Some(t) = s.dirty_at {
                if now >= t.saturating_add(debounce) {
                    Trigger::Event
                } else if now >= s.last_pass_ms.saturating_add(poll) {
                    // Events arriving faster than the window never hold off the poll.
                    Trigger::Poll
                } else {
                    return None;
                }
            } else if s.upgrade.result.is_some() || s.retry_at.is_some_and(|t| now >= t) {
                Trigger::Upgrade
            } else if s.verify_at.is_some_and(|t| now >= t) {
                Trigger::Verify
            } else if now >= s.last_pass_ms.saturating_add(poll) {
                Trigger::Poll
            } else {
                return None;
            }
        };
        Some(self.run_pass(trigger))
    }

    /// Run a pass immediately, ignoring the schedule.
    pub fn reconcile_now(&self) -> PassReport {
        self.run_pass(Trigger::Manual)
    }

    pub fn snapshot(&self) -> WalletResult<Snapshot> {
        let nodes = self
            .inner
            .nodes
            .iter()
            .map(|n| NodeView {
                label: n.label(),
                state: n.state(),
                provider_type: n.provider_type(),
                mounted: n.is_mounted(),
            })
            .collect();
        Ok(Snapshot { nodes, session: self.inner.store.try_load()?, epoch: self.inner.store.epoch() })
    }

    fn run_pass(&self, trigger: Trigger) -> PassReport {
        let _pass = lock(&self.inner.pass_lock);
        let (now, pending) = {
            let mut s = self.inner.schedule();
            s.dirty_at = None;
            s.verify_at = None;
            s.retry_at = None;
            s.retry = false;
            s.last_pass_ms = s.now_ms;
            s.passes += 1;
            (s.now_ms, s.upgrade.result.take())
        };

        let mut report = PassReport::new(trigger, now);
        let writes_before = self.inner.store.write_count();
        let seq_before = self.bus().last_seq();

        let outcome = self.pass_body(now, pending, &mut report);

        report.writes = self.inner.store.write_count() - writes_before;
        report.published = self.bus().last_seq() - seq_before;
        {
            let mut s = self.inner.schedule();
            if let Err(e) = outcome {
                tracing::warn!(error = %e, trigger = ?trigger, "reconcile pass aborted, retrying next tick");
                report.error = Some(e.to_string());
                s.settled = None;
                s.retry = true;
            }
            if report.acted() {
                s.verify_at = Some(now.saturating_add(self.inner.config.debounce_ms));
            }
        }
        if report.acted() || report.upgrade_started {
            tracing::info!(
                trigger = ?trigger,
                actions = ?report.actions.iter().map(Action::name).collect::<Vec<_>>(),
                writes = report.writes,
                published = report.published,
                upgrade_started = report.upgrade_started,
                upgrade_applied = report.upgrade_applied,
                "reconcile pass"
            );
        } else {
            tracing::debug!(trigger = ?trigger, skipped = report.skipped, "reconcile pass, nothing to do");
        }
        report
    }

    fn pass_body(&self, now: u64, pending: Option<UpgradeResult>, report: &mut PassReport) -> WalletResult<()> {
        if let Some(result) = pending {
            self.apply_upgrade(result, now, report)?;
        }

        let snapshot = self.snapshot()?;
        {
            let mut s = self.inner.schedule();
            if s.upgrade.epoch != snapshot.epoch {
                if s.upgrade.attempts > 0 {
                    tracing::debug!(attempts = s.upgrade.attempts, "session cleared, upgrade budget reset");
                }
                s.upgrade.reset(snapshot.epoch);
                s.settled = None;
            }
        }

        let unchanged = self.inner.schedule().settled.as_ref() == Some(&snapshot);
        if unchanged {
            report.skipped = true;
        } else {
            let actions = plan(&snapshot);
            for action in &actions {
                self.execute(action, &snapshot)?;
            }
            report.actions = actions;
        }

        if report.actions.is_empty() && !report.upgrade_applied {
            self.maybe_start_upgrade(&snapshot, now, report);
            self.inner.schedule().settled = Some(snapshot);
        } else {
            self.inner.schedule().settled = None;
        }
        Ok(())
    }

    fn node(&self, index: usize) -> WalletResult<&Arc<dyn ProviderNode>> {
        self.inner.nodes.get(index).ok_or_else(|| WalletError::Provider(format!("no provider node at {index}")))
    }

    fn execute(&self, action: &Action, snapshot: &Snapshot) -> WalletResult<()> {
        match action {
            Action::ForceDisconnect { node, kept, dropped } => {
                let loser = self.node(*node)?;
                tracing::warn!(kept = %kept.short(), dropped = %dropped.short(), loser = loser.label().as_str(), "conflicting identities");
                loser.force_disconnect("conflicting identity");
                self.bus().notify_user(UserNotice::ConflictingIdentity {
                    kept: kept.clone(),
                    dropped: dropped.clone(),
                    reconnect: loser.label(),
                });
            }
            Action::Persist { node, address } => {
                let winner = self.node(*node)?;
                let view = snapshot.nodes.get(*node).ok_or_else(|| WalletError::Provider(format!("no snapshot for node {node}")))?;
                let capable = view.state.capability == Capability::Signing;
                let mut session = WalletSession::new(address.clone(), view.provider_type, capable);
                if let Some(artifact) = winner.auth_artifact() {
                    session = session.with_artifact(artifact);
                }
                self.inner.store.save(session, Source::Engine)?;
            }
            Action::Broadcast { address, force } => {
                let flags = if *force { EventFlags::forced() } else { EventFlags::sync_all() };
                self.bus().publish(SyncEvent::connect(address.clone(), Source::Engine).with_flags(flags));
            }
            Action::Retract => {
                self.bus().publish(SyncEvent::disconnect(Source::Engine));
            }
        }
        Ok(())
    }

    fn apply_upgrade(&self, result: UpgradeResult, now: u64, report: &mut PassReport) -> WalletResult<()> {
        if result.epoch != self.inner.store.epoch() {
            tracing::debug!(attempt = result.attempt, "upgrade finished after a disconnect, discarded");
            return Ok(());
        }
        let current = self.inner.store.try_load()?;
        if current.as_ref().map(|s| s.address()) != Some(&result.address) {
            tracing::debug!(attempt = result.attempt, "upgrade finished for another session, discarded");
            return Ok(());
        }

        let failure = match result.outcome {
            Ok(index) => {
                let node = self.node(index)?;
                if node.bind_signer(&result.address) {
                    if self.inner.store.mark_capable(&result.address, Source::Engine)? {
                        report.upgrade_applied = true;
                    }
                    tracing::info!(via = node.label().as_str(), attempt = result.attempt, "capability upgrade succeeded");
                    return Ok(());
                }
                WalletError::CapabilityUpgrade(format!("{} refused the signer", node.label().as_str()))
            }
            Err(e) => e,
        };

        let max = self.inner.config.max_upgrade_attempts;
        let mut s = self.inner.schedule();
        s.upgrade.not_before_ms = now.saturating_add(self.inner.config.debounce_ms);
        if s.upgrade.attempts >= max {
            tracing::info!(attempts = s.upgrade.attempts, error = %failure, "capability upgrade budget spent, staying read-only");
        } else {
            tracing::warn!(attempt = result.attempt, max, error = %failure, "capability upgrade attempt failed");
            s.retry_at = Some(s.upgrade.not_before_ms);
        }
        Ok(())
    }

    fn maybe_start_upgrade(&self, snapshot: &Snapshot, now: u64, report: &mut PassReport) {
        let Some(session) = snapshot.session.as_ref() else { return };
        if !session.upgrade_owed() {
            return;
        }
        if self.inner.config.proxy_ready() {
            tracing::debug!("proxy signer ready, upgrade not needed");
            return;
        }

        let (attempt, epoch) = {
            let mut s = self.inner.schedule();
            if s.upgrade.in_flight || s.upgrade.result.is_some() || s.upgrade.attempts >= self.inner.config.max_upgrade_attempts {
                return;
            }
            if now < s.upgrade.not_before_ms {
                s.retry_at = Some(s.upgrade.not_before_ms);
                return;
            }
            if tokio::runtime::Handle::try_current().is_err() {
                tracing::warn!("no async runtime, upgrade deferred");
                return;
            }
            s.upgrade.attempts += 1;
            s.upgrade.in_flight = true;
            (s.upgrade.attempts, s.upgrade.epoch)
        };

        let weak = Arc::downgrade(&self.inner);
        let nodes = self.inner.nodes.clone();
        let session = session.clone();
        let address = session.address().clone();
        let timeout = self.inner.config.upgrade_timeout();
        tracing::info!(attempt, max = self.inner.config.max_upgrade_attempts, address = %address.short(), "capability upgrade started");

        let task = tokio::spawn(async move {
            let outcome = upgrade::attempt(nodes, session, timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_upgrade(UpgradeResult { epoch, address, attempt, outcome });
            }
        });
        self.inner.schedule().task = Some(task);
        report.upgrade_started = true;
    }
}
