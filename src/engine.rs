use crate::error::{Error, LOAD_FAILURE_MESSAGE, Result};
use crate::events::{EngineEvent, EventBus, EventKind, RoleUpdate, SubscriptionId};
use crate::graph::{Category, DependencyMap, FeatureGraph, Role};
use crate::matrix::{PendingChangeSet, RoleFeatureMatrix, effective_features};
use crate::notify::{NoNotifier, Notifier};
use crate::preview::{DEFAULT_LIMITED_THRESHOLD, PreviewCache, PreviewKey, RolePreview, preview_role_interface};
use crate::queue::{ChangeQueue, DEFAULT_QUIET_PERIOD};
use crate::store::Store;
use crate::types::{FeatureId, RoleId};
use crate::validator::{
    BulkImpact, BulkOperation, CycleReport, ValidationResult, detect_circular_dependencies,
    plan_bulk_changes, validate_bulk_operation, validate_change,
};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Debounce quiet period in milliseconds.
    pub quiet_period_ms: u64,
    /// Coverage ratio below which a preview is limited.
    pub limited_threshold: f64,
}

impl EngineConfig {
    /// Debounce quiet period.
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: DEFAULT_QUIET_PERIOD.as_millis() as u64,
            limited_threshold: DEFAULT_LIMITED_THRESHOLD,
        }
    }
}

/// Feature visibility engine.
///
/// Owns the catalog, roles and committed matrix; every mutation goes through
/// it. Cloning is cheap and clones share state. Toggles are debounced on the
/// current tokio runtime.
#[derive(Debug)]
pub struct Engine<S, N = NoNotifier> {
    inner: Arc<Inner<S, N>>,
}

impl<S, N> Clone for Engine<S, N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct Inner<S, N> {
    store: S,
    notifier: N,
    config: EngineConfig,
    state: RwLock<State>,
    load_lock: tokio::sync::Mutex<()>,
    queue: ChangeQueue,
    previews: PreviewCache,
    events: EventBus,
}

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    loading: bool,
    error: Option<String>,
    graph: Arc<FeatureGraph>,
    roles: Vec<Role>,
    matrix: RoleFeatureMatrix,
    matrix_version: u64,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S, N = NoNotifier> {
    store: S,
    notifier: N,
    config: EngineConfig,
}

impl<S> EngineBuilder<S, NoNotifier> {
    /// Creates a new builder with default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            notifier: NoNotifier,
            config: EngineConfig::default(),
        }
    }
}

impl<S, N> EngineBuilder<S, N> {
    /// Sets the debounce quiet period.
    pub fn quiet_period(mut self, period: Duration) -> Self {
        self.config.quiet_period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the limited-coverage threshold, clamped to `[0, 1]`.
    pub fn limited_threshold(mut self, threshold: f64) -> Self {
        self.config.limited_threshold = threshold;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the toast collaborator.
    pub fn notifier<N2: Notifier>(self, notifier: N2) -> EngineBuilder<S, N2> {
        EngineBuilder {
            store: self.store,
            notifier,
            config: self.config,
        }
    }

    /// Builds the engine. Nothing is loaded until first use.
    pub fn build(self) -> Engine<S, N> {
        let mut config = self.config;
        config.limited_threshold = if config.limited_threshold.is_nan() {
            DEFAULT_LIMITED_THRESHOLD
        } else {
            config.limited_threshold.clamp(0.0, 1.0)
        };

        Engine {
            inner: Arc::new(Inner {
                store: self.store,
                notifier: self.notifier,
                config,
                state: RwLock::new(State::default()),
                load_lock: tokio::sync::Mutex::new(()),
                queue: ChangeQueue::new(config.quiet_period()),
                previews: PreviewCache::new(),
                events: EventBus::new(),
            }),
        }
    }
}

impl<S, N> Engine<S, N>
where
    S: Store + 'static,
    N: Notifier + 'static,
{
    /// Effective configuration.
    pub fn config(&self) -> EngineConfig {
        self.inner.config
    }

    /// Whether a configuration load is in progress.
    pub fn loading(&self) -> bool {
        self.read_state().loading
    }

    /// Last user-facing error, if any.
    pub fn error(&self) -> Option<String> {
        self.read_state().error.clone()
    }

    /// Clears the user-facing error.
    pub fn clear_error(&self) {
        self.write_state().error = None;
    }

    /// Snapshot of the loaded categories.
    pub fn feature_categories(&self) -> Vec<Category> {
        self.read_state().graph.categories().to_vec()
    }

    /// Snapshot of the loaded roles.
    pub fn roles(&self) -> Vec<Role> {
        self.read_state().roles.clone()
    }

    /// Snapshot of the committed matrix.
    pub fn matrix(&self) -> RoleFeatureMatrix {
        self.read_state().matrix.clone()
    }

    /// Current dependency graph.
    pub fn graph(&self) -> Arc<FeatureGraph> {
        Arc::clone(&self.read_state().graph)
    }

    /// Loads the configuration unless a load was already attempted.
    ///
    /// Load failures leave an empty, stable state and are reported through
    /// [`Engine::error`] and the notifier.
    pub async fn ensure_loaded(&self) {
        if self.read_state().initialized {
            return;
        }
        let _guard = self.inner.load_lock.lock().await;
        if self.read_state().initialized {
            return;
        }
        let _ = self.load().await;
    }

    /// Reloads catalog, roles and matrix from the store.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.inner.load_lock.lock().await;
        self.load().await
    }

    /// Memoized transitive dependency map of the catalog.
    pub async fn feature_dependencies(&self) -> Arc<DependencyMap> {
        self.ensure_loaded().await;
        self.graph().dependency_map()
    }

    /// Validates a single change against the role's optimistic state.
    pub async fn validate_feature_change(
        &self,
        role: &RoleId,
        feature: &FeatureId,
        enabling: bool,
    ) -> ValidationResult {
        self.ensure_loaded().await;
        let state = self.read_state();
        let enabled = self.effective_set(&state, role);
        validate_change(&state.graph, &enabled, feature, enabling)
    }

    /// Scans the loaded catalog for dependency cycles.
    pub async fn detect_circular_dependencies(&self) -> CycleReport {
        self.ensure_loaded().await;
        let report = detect_circular_dependencies(&self.graph());
        if report.has_circular_dependencies {
            warn!(cycles = report.cycles.len(), "circular feature dependencies detected");
        }
        report
    }

    /// Validates a bulk operation against the optimistic state of every role.
    pub async fn validate_bulk_operation(&self, operation: &BulkOperation) -> ValidationResult {
        self.ensure_loaded().await;
        let state = self.read_state();
        validate_bulk_operation(
            &state.graph,
            &state.roles,
            |role| self.effective_set(&state, role),
            operation,
        )
    }

    /// Validates a toggle and, when valid, queues it for a debounced write.
    ///
    /// Invalid requests, including unknown roles, are returned unchanged and
    /// never queued.
    pub async fn update_role_features(
        &self,
        role: &RoleId,
        feature: &FeatureId,
        enabled: bool,
    ) -> Result<ValidationResult> {
        self.ensure_loaded().await;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let validation = {
            let state = self.read_state();
            if state.roles.iter().any(|known| &known.id == role) {
                let effective = self.effective_set(&state, role);
                validate_change(&state.graph, &effective, feature, enabled)
            } else {
                ValidationResult::invalid(format!("Unknown role: {role}"))
            }
        };
        if !validation.is_valid {
            debug!(role = %role, feature = %feature, enabled, "feature change rejected");
            return Ok(validation);
        }

        // Kept even when it matches the committed value: a write for this
        // role may be in flight, and the flush drops no-op intents.
        self.inner.queue.record(role, feature.clone(), enabled);

        let engine = self.clone();
        let target = role.clone();
        self.inner.queue.schedule(role, &runtime, move || async move {
            if let Err(err) = engine.flush(&target, false).await {
                debug!(role = %target, error = %err, "debounced flush failed");
            }
        });
        debug!(role = %role, feature = %feature, enabled, "feature change queued");
        Ok(validation)
    }

    /// Validates a bulk operation and, when valid, writes once per selected
    /// role. Writes for different roles run concurrently.
    pub async fn bulk_update_features(&self, operation: &BulkOperation) -> Result<ValidationResult> {
        self.ensure_loaded().await;

        let (validation, plans, category) = {
            let state = self.read_state();
            let enabled_for = |role: &RoleId| self.effective_set(&state, role);
            let validation =
                validate_bulk_operation(&state.graph, &state.roles, enabled_for, operation);
            let plans = plan_bulk_changes(&state.graph, &state.roles, enabled_for, operation);
            let category = state
                .graph
                .category(&operation.category_id)
                .map(|category| category.name.clone())
                .unwrap_or_else(|| operation.category_id.to_string());
            (validation, plans, category)
        };
        if !validation.is_valid {
            debug!(category = %operation.category_id, "bulk operation rejected");
            return Ok(validation);
        }

        for plan in &plans {
            for change in &plan.changes {
                self.inner
                    .queue
                    .record(&plan.role, change.feature.clone(), change.enabled);
            }
            self.inner.queue.cancel_timer(&plan.role);
        }

        let results = join_all(plans.iter().map(|plan| self.flush(&plan.role, true))).await;
        if let Some(err) = results.into_iter().find_map(|result| result.err()) {
            return Err(err);
        }

        info!(category = %operation.category_id, roles = plans.len(), "bulk update applied");
        self.inner
            .notifier
            .success(&format!("Updated {category} for {} roles", plans.len()));
        Ok(validation)
    }

    /// Number of users currently assigned to `role`.
    pub async fn affected_users(&self, role: &RoleId, feature: &FeatureId) -> Result<u64> {
        self.ensure_loaded().await;
        let count = self
            .inner
            .store
            .count_users_with_role(role.clone())
            .await
            .map_err(Error::from)?;
        debug!(role = %role, feature = %feature, count, "counted affected users");
        Ok(count)
    }

    /// Computes what a bulk operation would change without applying it.
    pub async fn calculate_bulk_operation_impact(
        &self,
        operation: &BulkOperation,
    ) -> Result<BulkImpact> {
        self.ensure_loaded().await;

        let (validation, plans) = {
            let state = self.read_state();
            let enabled_for = |role: &RoleId| self.effective_set(&state, role);
            (
                validate_bulk_operation(&state.graph, &state.roles, enabled_for, operation),
                plan_bulk_changes(&state.graph, &state.roles, enabled_for, operation),
            )
        };

        let mut affected_users = 0;
        for plan in &plans {
            affected_users += self
                .inner
                .store
                .count_users_with_role(plan.role.clone())
                .await
                .map_err(Error::from)?;
        }

        Ok(BulkImpact {
            affected_users,
            changes: plans.into_iter().flat_map(|plan| plan.changes).collect(),
            warnings: validation.warnings,
            errors: validation.errors,
        })
    }

    /// Interface preview from committed state plus pending changes.
    ///
    /// Repeated calls with unchanged inputs return the same `Arc`.
    pub async fn preview_role_interface(&self, role: &RoleId) -> Arc<RolePreview> {
        self.ensure_loaded().await;
        let state = self.read_state();
        let key = PreviewKey {
            matrix_version: state.matrix_version,
            pending_version: self.inner.queue.version(role),
        };
        self.inner.previews.get_or_compute(role, key, || {
            let record = state
                .roles
                .iter()
                .find(|candidate| &candidate.id == role)
                .cloned()
                .unwrap_or_else(|| Role::new(role.clone(), role.as_str()));
            preview_role_interface(
                &state.graph,
                &record,
                &self.effective_set(&state, role),
                self.inner.config.limited_threshold,
            )
        })
    }

    /// Pending, not yet persisted changes for a role.
    pub fn pending_changes(&self, role: &RoleId) -> Option<PendingChangeSet> {
        self.inner.queue.pending(role)
    }

    /// Drops a role's pending changes and cancels its timer.
    pub fn discard_pending_changes(&self, role: &RoleId) -> bool {
        let discarded = self.inner.queue.discard(role);
        if discarded {
            debug!(role = %role, "pending changes discarded");
        }
        discarded
    }

    /// Persists a role's pending changes now instead of after the quiet period.
    pub async fn flush_role(&self, role: &RoleId) -> Result<()> {
        self.inner.queue.cancel_timer(role);
        self.flush(role, false).await.map(|_| ())
    }

    /// Persists every role's pending changes now.
    pub async fn flush_pending(&self) -> Result<()> {
        let roles = self.inner.queue.pending_roles();
        let results = join_all(roles.iter().map(|role| self.flush_role(role))).await;
        results.into_iter().collect()
    }

    /// Registers a handler for an event kind.
    pub fn subscribe<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    async fn load(&self) -> Result<()> {
        self.write_state().loading = true;
        info!("loading feature configuration");

        match self.fetch_configuration().await {
            Ok((graph, roles, matrix)) => {
                let features = graph.len();
                let role_count = roles.len();
                {
                    let mut state = self.write_state();
                    state.graph = Arc::new(graph);
                    state.roles = roles;
                    state.matrix = matrix;
                    state.matrix_version += 1;
                    state.initialized = true;
                    state.loading = false;
                    state.error = None;
                }
                self.inner.previews.clear();
                info!(features, roles = role_count, "feature configuration loaded");
                self.inner.events.emit(&EngineEvent::ConfigurationLoaded {
                    features,
                    roles: role_count,
                });
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to load feature configuration");
                {
                    let mut state = self.write_state();
                    state.graph = Arc::default();
                    state.roles = Vec::new();
                    state.matrix = RoleFeatureMatrix::new();
                    state.matrix_version += 1;
                    state.initialized = true;
                    state.loading = false;
                    state.error = Some(LOAD_FAILURE_MESSAGE.to_string());
                }
                self.inner.previews.clear();
                self.inner.notifier.error(LOAD_FAILURE_MESSAGE);
                Err(err)
            }
        }
    }

    async fn fetch_configuration(&self) -> Result<(FeatureGraph, Vec<Role>, RoleFeatureMatrix)> {
        let categories = self
            .inner
            .store
            .load_feature_categories()
            .await
            .map_err(Error::Load)?;
        let roles = self.inner.store.load_roles().await.map_err(Error::Load)?;

        let graph = FeatureGraph::new(categories)?;
        let mut seen_roles = HashSet::new();
        for role in &roles {
            if !seen_roles.insert(&role.id) {
                return Err(Error::InvalidCatalog(format!("duplicate role id {}", role.id)));
            }
        }
        for (feature, dependency) in graph.dangling_dependencies() {
            warn!(feature = %feature, dependency = %dependency, "dependency not in catalog");
        }

        let mut matrix = RoleFeatureMatrix::new();
        for role in &roles {
            let features = self
                .inner
                .store
                .load_role_features(role.id.clone())
                .await
                .map_err(Error::Load)?;
            matrix.set_role_features(role.id.clone(), known_features(&graph, &role.id, features));
        }

        Ok((graph, roles, matrix))
    }

    /// Writes `committed ⊕ pending` for a role while holding its write lock.
    /// Without `force`, a pending set with no net change issues no write.
    async fn flush(&self, role: &RoleId, force: bool) -> Result<bool> {
        let lock = self.inner.queue.write_lock(role);
        let _guard = lock.lock().await;

        let snapshot = self.inner.queue.pending(role).unwrap_or_default();
        let committed = self.read_state().matrix.enabled_features(role);
        let changes = snapshot.net_changes(&committed);
        if changes.is_empty() && !force {
            self.inner.queue.settle(role, &snapshot);
            debug!(role = %role, "nothing to flush");
            return Ok(false);
        }

        let next = snapshot.apply_to(&committed);
        let mut features: Vec<FeatureId> = next.iter().cloned().collect();
        features.sort();
        debug!(role = %role, features = features.len(), "persisting role features");

        if let Err(source) = self
            .inner
            .store
            .write_role_features(role.clone(), features)
            .await
        {
            let message = format!("Failed to update feature access for {}", self.role_name(role));
            error!(role = %role, error = %source, "failed to persist role features");
            self.write_state().error = Some(message.clone());
            self.inner.notifier.error(&message);
            return Err(Error::Persistence {
                role: role.clone(),
                source,
            });
        }

        let graph = self.graph();
        let refreshed: HashSet<FeatureId> = match self.inner.store.load_role_features(role.clone()).await {
            Ok(features) => known_features(&graph, role, features).collect(),
            Err(err) => {
                warn!(role = %role, error = %err, "re-reading role features failed; using written set");
                next
            }
        };
        {
            let mut state = self.write_state();
            state.matrix.set_role_features(role.clone(), refreshed);
            state.matrix_version += 1;
        }
        self.inner.queue.settle(role, &snapshot);

        info!(role = %role, changes = changes.len(), "role features persisted");
        if !force {
            self.inner
                .notifier
                .success(&format!("Feature access updated for {}", self.role_name(role)));
        }
        for (feature, enabled) in changes {
            self.inner.events.emit(&EngineEvent::RoleUpdate(RoleUpdate {
                role_id: role.clone(),
                feature,
                enabled,
            }));
        }
        Ok(true)
    }

    fn effective_set(&self, state: &State, role: &RoleId) -> HashSet<FeatureId> {
        effective_features(&state.matrix, role, self.inner.queue.pending(role).as_ref())
    }

    fn role_name(&self, role: &RoleId) -> String {
        self.read_state()
            .roles
            .iter()
            .find(|candidate| &candidate.id == role)
            .map(|candidate| candidate.name.clone())
            .unwrap_or_else(|| role.to_string())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().expect("poisoned lock")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().expect("poisoned lock")
    }
}

fn known_features(
    graph: &FeatureGraph,
    role: &RoleId,
    features: Vec<FeatureId>,
) -> impl Iterator<Item = FeatureId> {
    features.into_iter().filter(move |feature| {
        let known = graph.contains(feature);
        if !known {
            warn!(role = %role, feature = %feature, "ignoring unknown feature in matrix");
        }
        known
    })
}
