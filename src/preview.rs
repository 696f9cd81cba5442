//! What a role's interface looks like for a given enabled set.

use crate::graph::{FeatureGraph, Role};
use crate::types::{CategoryId, FeatureId, RoleId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Coverage ratio below which a preview is [`AccessibilityLevel::Limited`].
pub const DEFAULT_LIMITED_THRESHOLD: f64 = 0.5;

/// Warning attached to limited previews.
pub const LIMITED_ACCESS_WARNING: &str = "Limited feature access may impact user experience";

/// Coarse classification of how much of the catalog a role can reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AccessibilityLevel {
    /// Every known feature is available.
    Full,
    /// Coverage at or above the limited threshold.
    Partial,
    /// Coverage below the limited threshold.
    Limited,
    /// Nothing is available.
    None,
}

impl AccessibilityLevel {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Limited => "limited",
            Self::None => "none",
        }
    }
}

/// An available feature as shown in a preview.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureSummary {
    pub id: FeatureId,
    pub name: String,
    pub category: CategoryId,
    pub is_core: bool,
}

/// A navigation entry.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavigationItem {
    pub feature: FeatureId,
    pub name: String,
}

/// A navigation group, one per category with at least one available feature.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavigationSection {
    pub category: CategoryId,
    pub name: String,
    pub items: Vec<NavigationItem>,
}

/// Interface description for a role.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RolePreview {
    pub role_id: RoleId,
    pub role_name: String,
    pub available_features: Vec<FeatureSummary>,
    pub navigation_structure: Vec<NavigationSection>,
    pub accessible_apps: Vec<String>,
    pub permissions: Vec<String>,
    pub feature_count: usize,
    pub accessibility_level: AccessibilityLevel,
    pub warnings: Vec<String>,
}

/// Builds the preview for `role` given its effective enabled set.
///
/// Ids in `features` that are not in the catalog are ignored. An enabled
/// feature whose dependency is unavailable produces a warning; this state is
/// reachable because disabling never cascades.
pub fn preview_role_interface(
    graph: &FeatureGraph,
    role: &Role,
    features: &HashSet<FeatureId>,
    limited_threshold: f64,
) -> RolePreview {
    let mut available_features = Vec::new();
    let mut navigation_structure = Vec::new();
    let mut accessible_apps = Vec::new();
    let mut warnings = Vec::new();

    for category in graph.categories() {
        let items: Vec<NavigationItem> = category
            .features
            .iter()
            .filter(|feature| features.contains(&feature.id))
            .map(|feature| {
                available_features.push(FeatureSummary {
                    id: feature.id.clone(),
                    name: feature.name.clone(),
                    category: category.id.clone(),
                    is_core: feature.is_core,
                });
                for dependency in &feature.dependencies {
                    if !features.contains(dependency) {
                        warnings.push(format!(
                            "{} is enabled but requires {}",
                            feature.name,
                            graph.display_name(dependency)
                        ));
                    }
                }
                NavigationItem {
                    feature: feature.id.clone(),
                    name: feature.name.clone(),
                }
            })
            .collect();

        if !items.is_empty() {
            accessible_apps.push(category.name.clone());
            navigation_structure.push(NavigationSection {
                category: category.id.clone(),
                name: category.name.clone(),
                items,
            });
        }
    }

    let feature_count = available_features.len();
    let accessibility_level = accessibility_level(feature_count, graph.len(), limited_threshold);
    if accessibility_level == AccessibilityLevel::Limited {
        warnings.push(LIMITED_ACCESS_WARNING.to_string());
    }

    RolePreview {
        role_id: role.id.clone(),
        role_name: role.name.clone(),
        available_features,
        navigation_structure,
        accessible_apps,
        permissions: role.permissions.clone(),
        feature_count,
        accessibility_level,
        warnings,
    }
}

fn accessibility_level(count: usize, total: usize, limited_threshold: f64) -> AccessibilityLevel {
    if count == 0 {
        return AccessibilityLevel::None;
    }
    if count >= total {
        return AccessibilityLevel::Full;
    }
    let coverage = count as f64 / total as f64;
    if coverage < limited_threshold {
        AccessibilityLevel::Limited
    } else {
        AccessibilityLevel::Partial
    }
}

/// Inputs a cached preview was computed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    /// Version of the committed matrix and catalog.
    pub matrix_version: u64,
    /// Version of the role's pending change set.
    pub pending_version: u64,
}

/// Per-role memo of the last computed preview.
#[derive(Debug, Default)]
pub struct PreviewCache {
    entries: Mutex<HashMap<RoleId, (PreviewKey, Arc<RolePreview>)>>,
}

impl PreviewCache {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached preview when `key` matches, otherwise computes and
    /// stores a new one. Unchanged inputs always yield the same `Arc`.
    pub fn get_or_compute<F>(&self, role: &RoleId, key: PreviewKey, compute: F) -> Arc<RolePreview>
    where
        F: FnOnce() -> RolePreview,
    {
        if let Some(hit) = self.lookup(role, key) {
            return hit;
        }

        let computed = Arc::new(compute());
        let mut guard = self.entries.lock().expect("poisoned lock");
        match guard.get(role) {
            Some((cached_key, cached)) if *cached_key == key => Arc::clone(cached),
            _ => {
                guard.insert(role.clone(), (key, Arc::clone(&computed)));
                computed
            }
        }
    }

    /// Drops every cached preview.
    pub fn clear(&self) {
        self.entries.lock().expect("poisoned lock").clear();
    }

    fn lookup(&self, role: &RoleId, key: PreviewKey) -> Option<Arc<RolePreview>> {
        let guard = self.entries.lock().expect("poisoned lock");
        guard
            .get(role)
            .filter(|(cached_key, _)| *cached_key == key)
            .map(|(_, preview)| Arc::clone(preview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Category, Feature};

    fn fid(value: &str) -> FeatureId {
        FeatureId::try_from(value).unwrap()
    }

    fn cid(value: &str) -> CategoryId {
        CategoryId::try_from(value).unwrap()
    }

    fn set(ids: &[&str]) -> HashSet<FeatureId> {
        ids.iter().map(|id| fid(id)).collect()
    }

    fn graph() -> FeatureGraph {
        FeatureGraph::new(vec![
            Category::new(cid("finance"), "Finance")
                .with_feature(Feature::new(fid("expenses"), "Expense Manager", cid("finance")).core(true))
                .with_feature(
                    Feature::new(fid("analytics"), "Analytics", cid("finance"))
                        .depends_on([fid("expenses")]),
                ),
            Category::new(cid("admin"), "Administration")
                .with_feature(Feature::new(fid("users"), "User Management", cid("admin")))
                .with_feature(Feature::new(fid("audit"), "Audit Log", cid("admin"))),
        ])
        .unwrap()
    }

    fn viewer() -> Role {
        Role::new(RoleId::try_from("viewer").unwrap(), "Viewer").with_permission("read")
    }

    #[test]
    fn preview_should_group_available_features_by_category() {
        let preview = preview_role_interface(
            &graph(),
            &viewer(),
            &set(&["expenses", "analytics", "audit"]),
            DEFAULT_LIMITED_THRESHOLD,
        );

        assert_eq!(preview.feature_count, 3);
        assert_eq!(preview.accessibility_level, AccessibilityLevel::Partial);
        assert_eq!(preview.accessible_apps, vec!["Finance", "Administration"]);
        assert_eq!(preview.navigation_structure[1].items.len(), 1);
        assert_eq!(preview.permissions, vec!["read"]);
        assert!(preview.warnings.is_empty());
    }

    #[test]
    fn preview_should_classify_levels() {
        let graph = graph();
        let level = |ids: &[&str]| {
            preview_role_interface(&graph, &viewer(), &set(ids), DEFAULT_LIMITED_THRESHOLD)
                .accessibility_level
        };

        assert_eq!(level(&["expenses", "analytics", "users", "audit"]), AccessibilityLevel::Full);
        assert_eq!(level(&["expenses", "users"]), AccessibilityLevel::Partial);
        assert_eq!(level(&["expenses"]), AccessibilityLevel::Limited);
        assert_eq!(level(&[]), AccessibilityLevel::None);
        assert_eq!(level(&["ghost"]), AccessibilityLevel::None);
    }

    #[test]
    fn limited_preview_should_warn() {
        let preview =
            preview_role_interface(&graph(), &viewer(), &set(&["audit"]), DEFAULT_LIMITED_THRESHOLD);
        assert_eq!(preview.warnings, vec![LIMITED_ACCESS_WARNING]);
    }

    #[test]
    fn preview_should_warn_about_broken_dependencies() {
        let preview = preview_role_interface(
            &graph(),
            &viewer(),
            &set(&["analytics", "users", "audit"]),
            DEFAULT_LIMITED_THRESHOLD,
        );
        assert_eq!(
            preview.warnings,
            vec!["Analytics is enabled but requires Expense Manager"]
        );
    }

    #[test]
    fn cache_should_return_same_arc_for_same_key() {
        let cache = PreviewCache::new();
        let graph = graph();
        let role = viewer();
        let key = PreviewKey {
            matrix_version: 1,
            pending_version: 0,
        };
        let compute = || preview_role_interface(&graph, &role, &set(&["audit"]), 0.5);

        let first = cache.get_or_compute(&role.id, key, compute);
        let second = cache.get_or_compute(&role.id, key, || panic!("must hit cache"));
        assert!(Arc::ptr_eq(&first, &second));

        let changed = PreviewKey {
            pending_version: 1,
            ..key
        };
        let third = cache.get_or_compute(&role.id, changed, compute);
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
