use crate::types::{FeatureId, RoleId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Committed mapping of role to enabled features.
///
/// A role without an entry has no features enabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RoleFeatureMatrix {
    roles: HashMap<RoleId, HashSet<FeatureId>>,
}

impl RoleFeatureMatrix {
    /// Creates an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the enabled set for a role, if the role has an entry.
    pub fn features(&self, role: &RoleId) -> Option<&HashSet<FeatureId>> {
        self.roles.get(role)
    }

    /// Returns a copy of the enabled set for a role (empty when absent).
    pub fn enabled_features(&self, role: &RoleId) -> HashSet<FeatureId> {
        self.roles.get(role).cloned().unwrap_or_default()
    }

    /// Returns whether a feature is enabled for a role.
    pub fn is_enabled(&self, role: &RoleId, feature: &FeatureId) -> bool {
        self.roles
            .get(role)
            .is_some_and(|features| features.contains(feature))
    }

    /// Replaces the enabled set for a role.
    pub fn set_role_features(
        &mut self,
        role: RoleId,
        features: impl IntoIterator<Item = FeatureId>,
    ) {
        self.roles.insert(role, features.into_iter().collect());
    }

    /// Iterates roles that have an entry.
    pub fn roles(&self) -> impl Iterator<Item = &RoleId> {
        self.roles.keys()
    }

    /// Number of role entries.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Returns whether the matrix has no role entries.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Per-role intended changes that have not been persisted yet.
///
/// Only the last intent for each feature is kept. An intent is kept even when
/// it matches the committed value, since a write for the same role may still
/// be in flight; flushing skips intents with no net change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingChangeSet {
    changes: BTreeMap<FeatureId, bool>,
}

impl PendingChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an intent. Returns whether the set changed.
    pub fn record(&mut self, feature: FeatureId, enabled: bool) -> bool {
        self.changes.insert(feature, enabled) != Some(enabled)
    }

    /// Pending intent for a feature.
    pub fn get(&self, feature: &FeatureId) -> Option<bool> {
        self.changes.get(feature).copied()
    }

    /// Iterates `(feature, enabled)` intents in feature order.
    pub fn iter(&self) -> impl Iterator<Item = (&FeatureId, bool)> {
        self.changes.iter().map(|(feature, enabled)| (feature, *enabled))
    }

    /// Number of pending intents.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Applies the intents on top of a committed set.
    pub fn apply_to(&self, committed: &HashSet<FeatureId>) -> HashSet<FeatureId> {
        let mut next = committed.clone();
        for (feature, enabled) in self.iter() {
            if enabled {
                next.insert(feature.clone());
            } else {
                next.remove(feature);
            }
        }
        next
    }

    /// Intents that differ from the committed set.
    pub fn net_changes(&self, committed: &HashSet<FeatureId>) -> Vec<(FeatureId, bool)> {
        self.iter()
            .filter(|(feature, enabled)| committed.contains(*feature) != *enabled)
            .map(|(feature, enabled)| (feature.clone(), enabled))
            .collect()
    }

    /// Removes intents that were persisted unchanged. Intents recorded after
    /// `flushed` was taken are kept. Returns whether the set changed.
    pub fn settle(&mut self, flushed: &PendingChangeSet) -> bool {
        let before = self.changes.len();
        self.changes
            .retain(|feature, enabled| flushed.get(feature) != Some(*enabled));
        before != self.changes.len()
    }
}

/// Committed features for a role with pending intents applied.
pub fn effective_features(
    matrix: &RoleFeatureMatrix,
    role: &RoleId,
    pending: Option<&PendingChangeSet>,
) -> HashSet<FeatureId> {
    match (matrix.features(role), pending) {
        (Some(committed), Some(pending)) => pending.apply_to(committed),
        (None, Some(pending)) => pending.apply_to(&HashSet::new()),
        (Some(committed), None) => committed.clone(),
        (None, None) => HashSet::new(),
    }
}
