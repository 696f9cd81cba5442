use crate::matrix::PendingChangeSet;
use crate::types::{FeatureId, RoleId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Default debounce quiet period.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(1);

/// Per-role debounce queue.
///
/// Holds each role's pending change set, a restartable quiet-period timer and
/// a write lock that serializes persistence for the role. Roles are
/// independent of each other.
#[derive(Debug)]
pub struct ChangeQueue {
    quiet_period: Duration,
    slots: Mutex<HashMap<RoleId, RoleSlot>>,
}

#[derive(Debug, Default)]
struct RoleSlot {
    pending: PendingChangeSet,
    version: u64,
    timer: Option<JoinHandle<()>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl RoleSlot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl ChangeQueue {
    /// Creates an empty queue.
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Configured quiet period.
    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Records the latest intent for `(role, feature)`. Returns whether the
    /// pending set changed.
    pub fn record(&self, role: &RoleId, feature: FeatureId, enabled: bool) -> bool {
        let mut guard = self.slots.lock().expect("poisoned lock");
        let slot = guard.entry(role.clone()).or_default();
        let changed = slot.pending.record(feature, enabled);
        if changed {
            slot.version += 1;
        }
        changed
    }

    /// Snapshot of a role's pending set, `None` when nothing is pending.
    pub fn pending(&self, role: &RoleId) -> Option<PendingChangeSet> {
        let guard = self.slots.lock().expect("poisoned lock");
        guard
            .get(role)
            .filter(|slot| !slot.pending.is_empty())
            .map(|slot| slot.pending.clone())
    }

    /// Counter bumped on every change to a role's pending set.
    pub fn version(&self, role: &RoleId) -> u64 {
        let guard = self.slots.lock().expect("poisoned lock");
        guard.get(role).map_or(0, |slot| slot.version)
    }

    /// Roles with a non-empty pending set.
    pub fn pending_roles(&self) -> Vec<RoleId> {
        let guard = self.slots.lock().expect("poisoned lock");
        let mut roles: Vec<RoleId> = guard
            .iter()
            .filter(|(_, slot)| !slot.pending.is_empty())
            .map(|(role, _)| role.clone())
            .collect();
        roles.sort();
        roles
    }

    /// Starts or restarts the quiet-period timer for a role. When it elapses
    /// without another restart, `flush` is spawned on `runtime`.
    ///
    /// The timer task only sleeps; aborting it never interrupts a flush that
    /// has already started.
    pub fn schedule<F, Fut>(&self, role: &RoleId, runtime: &Handle, flush: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let quiet_period = self.quiet_period;
        let spawner = runtime.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(quiet_period).await;
            spawner.spawn(flush());
        });

        let mut guard = self.slots.lock().expect("poisoned lock");
        let slot = guard.entry(role.clone()).or_default();
        if slot.timer.is_some() {
            trace!(role = %role, "restarting debounce timer");
        }
        slot.cancel_timer();
        slot.timer = Some(timer);
    }

    /// Cancels a role's timer without touching its pending set.
    pub fn cancel_timer(&self, role: &RoleId) {
        let mut guard = self.slots.lock().expect("poisoned lock");
        if let Some(slot) = guard.get_mut(role) {
            slot.cancel_timer();
        }
    }

    /// Lock held for the duration of a role's persistence call.
    pub fn write_lock(&self, role: &RoleId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.slots.lock().expect("poisoned lock");
        guard.entry(role.clone()).or_default().write_lock.clone()
    }

    /// Drops intents that `flushed` persisted. Returns whether the set changed.
    pub fn settle(&self, role: &RoleId, flushed: &PendingChangeSet) -> bool {
        let mut guard = self.slots.lock().expect("poisoned lock");
        let Some(slot) = guard.get_mut(role) else {
            return false;
        };
        let changed = slot.pending.settle(flushed);
        if changed {
            slot.version += 1;
        }
        changed
    }

    /// Destroys a role's pending set and cancels its timer. Returns whether
    /// anything was pending.
    pub fn discard(&self, role: &RoleId) -> bool {
        let mut guard = self.slots.lock().expect("poisoned lock");
        let Some(slot) = guard.get_mut(role) else {
            return false;
        };
        slot.cancel_timer();
        if slot.pending.is_empty() {
            return false;
        }
        slot.pending = PendingChangeSet::new();
        slot.version += 1;
        true
    }
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}
