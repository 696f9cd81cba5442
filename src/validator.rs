//! Dependency and core-feature rules.
//!
//! Everything here is a pure function of the graph and the enabled sets it is
//! given. Rule violations are reported as [`ValidationResult`] values, never as
//! errors, so callers can explain the problem to the user.

use crate::graph::{Feature, FeatureGraph, Role};
use crate::types::{CategoryId, FeatureId, RoleId};
use std::collections::{HashMap, HashSet};

/// Message returned when disabling a core feature.
pub const CORE_DISABLE_MESSAGE: &str = "Cannot disable core functionality";
/// Message returned when a bulk disable would strip core features from every role.
pub const CORE_DISABLE_ALL_MESSAGE: &str = "Cannot disable core features for all users";

/// Outcome of validating a requested change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidationResult {
    /// `true` when `errors` is empty.
    pub is_valid: bool,
    /// Violations that block the change.
    pub errors: Vec<String>,
    /// Consequences the caller should surface but that do not block the change.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// A passing result with no messages.
    pub fn valid() -> Self {
        Self::from_parts(Vec::new(), Vec::new())
    }

    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub(crate) fn invalid(error: String) -> Self {
        Self::from_parts(vec![error], Vec::new())
    }
}

/// Result of scanning the dependency graph for cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleReport {
    /// Whether at least one cycle exists.
    pub has_circular_dependencies: bool,
    /// Each cycle as the feature ids along it, starting at the re-entered feature.
    pub cycles: Vec<Vec<FeatureId>>,
}

/// Direction of a bulk operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BulkAction {
    /// Enable every feature in the category.
    Enable,
    /// Disable every non-core feature in the category.
    Disable,
}

impl BulkAction {
    fn enabled(self) -> bool {
        matches!(self, Self::Enable)
    }
}

/// A category-wide change applied to several roles at once.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BulkOperation {
    /// Target roles.
    pub role_ids: Vec<RoleId>,
    /// Target category.
    pub category_id: CategoryId,
    /// Enable or disable.
    pub action: BulkAction,
}

impl BulkOperation {
    /// Enables a category for the given roles.
    pub fn enable(role_ids: impl IntoIterator<Item = RoleId>, category_id: CategoryId) -> Self {
        Self {
            role_ids: role_ids.into_iter().collect(),
            category_id,
            action: BulkAction::Enable,
        }
    }

    /// Disables a category for the given roles.
    pub fn disable(role_ids: impl IntoIterator<Item = RoleId>, category_id: CategoryId) -> Self {
        Self {
            role_ids: role_ids.into_iter().collect(),
            category_id,
            action: BulkAction::Disable,
        }
    }
}

/// A single feature flip for a role.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureChange {
    /// Affected role.
    pub role: RoleId,
    /// Affected feature.
    pub feature: FeatureId,
    /// New state.
    pub enabled: bool,
}

/// Blast radius of a bulk operation, computed before it is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BulkImpact {
    /// Users currently assigned to the selected roles.
    pub affected_users: u64,
    /// Feature flips the operation would perform.
    pub changes: Vec<FeatureChange>,
    /// Validator warnings for the operation.
    pub warnings: Vec<String>,
    /// Validator errors; a non-empty list means the operation would be rejected.
    pub errors: Vec<String>,
}

/// Planned end state of one role after a bulk operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolePlan {
    /// Target role.
    pub role: RoleId,
    /// Enabled set after the operation.
    pub features: HashSet<FeatureId>,
    /// Flips relative to the current set, in category order.
    pub changes: Vec<FeatureChange>,
}

/// Validates enabling or disabling `feature` against a role's enabled set.
///
/// Enabling walks the full transitive dependency closure and reports every
/// unmet `(dependent, dependency)` link. Disabling is rejected only for core
/// features; enabled dependents produce a warning and are never disabled
/// automatically.
pub fn validate_change(
    graph: &FeatureGraph,
    enabled: &HashSet<FeatureId>,
    feature: &FeatureId,
    enabling: bool,
) -> ValidationResult {
    let Some(record) = graph.feature(feature) else {
        return ValidationResult::invalid(format!("Unknown feature: {feature}"));
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if enabling {
        for (dependent, dependency) in unmet_links(graph, feature, |id| enabled.contains(id)) {
            errors.push(requires_message(graph, &dependent, &dependency));
        }
    } else {
        if record.is_core {
            errors.push(CORE_DISABLE_MESSAGE.to_string());
        }
        let dependents = graph.transitive_dependents(feature);
        let affected: Vec<&str> = dependents
            .iter()
            .filter(|dependent| enabled.contains(*dependent))
            .map(|dependent| graph.display_name(dependent))
            .collect();
        if !affected.is_empty() {
            warnings.push(format!(
                "Disabling {} will also disable {}",
                record.name,
                affected.join(", ")
            ));
        }
    }

    ValidationResult::from_parts(errors, warnings)
}

/// Finds every dependency cycle with a depth-first walk that tracks the
/// current path. Terminates on any input, including self-loops.
pub fn detect_circular_dependencies(graph: &FeatureGraph) -> CycleReport {
    let mut cycles = Vec::new();
    let mut finished: HashSet<&FeatureId> = HashSet::new();

    for root in graph.features() {
        if finished.contains(&root.id) {
            continue;
        }

        let mut path: Vec<&FeatureId> = vec![&root.id];
        let mut on_path: HashSet<&FeatureId> = HashSet::from([&root.id]);
        let mut stack = vec![graph.dependencies(&root.id).iter()];

        while let Some(iter) = stack.last_mut() {
            let Some(dependency) = iter.next() else {
                stack.pop();
                if let Some(done) = path.pop() {
                    on_path.remove(done);
                    finished.insert(done);
                }
                continue;
            };

            if !graph.contains(dependency) {
                continue;
            }
            if on_path.contains(dependency) {
                if let Some(start) = path.iter().position(|id| *id == dependency) {
                    cycles.push(path[start..].iter().map(|id| (*id).clone()).collect());
                }
                continue;
            }
            if finished.contains(dependency) {
                continue;
            }

            path.push(dependency);
            on_path.insert(dependency);
            stack.push(graph.dependencies(dependency).iter());
        }
    }

    CycleReport {
        has_circular_dependencies: !cycles.is_empty(),
        cycles,
    }
}

/// Validates a category-wide operation across several roles.
///
/// `enabled_for` returns the current enabled set of a role. A disable that
/// covers every known role is rejected when the category holds a core
/// feature; a partial-role disable passes with warnings and leaves core
/// features enabled.
pub fn validate_bulk_operation<F>(
    graph: &FeatureGraph,
    roles: &[Role],
    enabled_for: F,
    operation: &BulkOperation,
) -> ValidationResult
where
    F: Fn(&RoleId) -> HashSet<FeatureId>,
{
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if operation.role_ids.is_empty() {
        errors.push("No roles selected".to_string());
    }
    for role in &operation.role_ids {
        if !roles.iter().any(|known| &known.id == role) {
            errors.push(format!("Unknown role: {role}"));
        }
    }
    let Some(category) = graph.category(&operation.category_id) else {
        errors.push(format!("Unknown category: {}", operation.category_id));
        return ValidationResult::from_parts(errors, warnings);
    };

    let selected = selected_roles(roles, &operation.role_ids);

    match operation.action {
        BulkAction::Disable => {
            let core: Vec<&Feature> = category.features.iter().filter(|f| f.is_core).collect();
            if !core.is_empty() {
                let covers_all = !roles.is_empty()
                    && roles.iter().all(|role| operation.role_ids.contains(&role.id));
                if covers_all {
                    errors.push(CORE_DISABLE_ALL_MESSAGE.to_string());
                } else {
                    for feature in core {
                        warnings.push(format!(
                            "Core feature {} stays enabled for selected roles",
                            feature.name
                        ));
                    }
                }
            }

            let removed: HashSet<&FeatureId> = category
                .features
                .iter()
                .filter(|f| !f.is_core)
                .map(|f| &f.id)
                .collect();
            for role in selected {
                let enabled = enabled_for(&role.id);
                let mut seen = HashSet::new();
                let mut affected = Vec::new();
                for feature in &category.features {
                    if !removed.contains(&feature.id) {
                        continue;
                    }
                    for dependent in graph.transitive_dependents(&feature.id) {
                        if enabled.contains(&dependent)
                            && !removed.contains(&dependent)
                            && seen.insert(dependent.clone())
                        {
                            affected.push(graph.display_name(&dependent).to_string());
                        }
                    }
                }
                if !affected.is_empty() {
                    warnings.push(format!(
                        "Disabling {} for {} will also disable {}",
                        category.name,
                        role.name,
                        affected.join(", ")
                    ));
                }
            }
        }
        BulkAction::Enable => {
            let mut seen = HashSet::new();
            for role in selected {
                let mut enabled = enabled_for(&role.id);
                enabled.extend(category.features.iter().map(|f| f.id.clone()));
                for feature in &category.features {
                    for (dependent, dependency) in
                        unmet_links(graph, &feature.id, |id| enabled.contains(id))
                    {
                        let message = format!(
                            "{} for {}",
                            requires_message(graph, &dependent, &dependency),
                            role.name
                        );
                        if seen.insert(message.clone()) {
                            errors.push(message);
                        }
                    }
                }
            }
        }
    }

    ValidationResult::from_parts(errors, warnings)
}

/// Computes the end state of every selected, known role. Core features are
/// never removed. Unknown roles and categories produce no plan.
pub fn plan_bulk_changes<F>(
    graph: &FeatureGraph,
    roles: &[Role],
    enabled_for: F,
    operation: &BulkOperation,
) -> Vec<RolePlan>
where
    F: Fn(&RoleId) -> HashSet<FeatureId>,
{
    let Some(category) = graph.category(&operation.category_id) else {
        return Vec::new();
    };
    let enabling = operation.action.enabled();

    selected_roles(roles, &operation.role_ids)
        .into_iter()
        .map(|role| {
            let mut features = enabled_for(&role.id);
            let mut changes = Vec::new();
            for feature in &category.features {
                if !enabling && feature.is_core {
                    continue;
                }
                let flipped = if enabling {
                    features.insert(feature.id.clone())
                } else {
                    features.remove(&feature.id)
                };
                if flipped {
                    changes.push(FeatureChange {
                        role: role.id.clone(),
                        feature: feature.id.clone(),
                        enabled: enabling,
                    });
                }
            }
            RolePlan {
                role: role.id.clone(),
                features,
                changes,
            }
        })
        .collect()
}

/// Known roles named by `ids`, in request order and without duplicates.
fn selected_roles<'a>(roles: &'a [Role], ids: &[RoleId]) -> Vec<&'a Role> {
    let by_id: HashMap<&RoleId, &Role> = roles.iter().map(|role| (&role.id, role)).collect();
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(*id))
        .filter_map(|id| by_id.get(id).copied())
        .collect()
}

/// Every `(dependent, dependency)` edge inside the closure of `feature` whose
/// dependency is not satisfied. `feature` itself counts as satisfied.
fn unmet_links<F>(graph: &FeatureGraph, feature: &FeatureId, is_enabled: F) -> Vec<(FeatureId, FeatureId)>
where
    F: Fn(&FeatureId) -> bool,
{
    std::iter::once(feature.clone())
        .chain(graph.transitive_dependencies(feature))
        .flat_map(|dependent| {
            graph
                .dependencies(&dependent)
                .iter()
                .filter(|&dependency| dependency != feature && !is_enabled(dependency))
                .map(|dependency| (dependent.clone(), dependency.clone()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn requires_message(graph: &FeatureGraph, dependent: &FeatureId, dependency: &FeatureId) -> String {
    if graph.contains(dependency) {
        format!(
            "{} requires {} access",
            graph.display_name(dependent),
            graph.display_name(dependency)
        )
    } else {
        format!(
            "{} requires unknown feature {}",
            graph.display_name(dependent),
            dependency
        )
    }
}
