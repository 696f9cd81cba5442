//! Feature catalog and its dependency graph.

use crate::error::{Error, Result};
use crate::types::{CategoryId, FeatureId, RoleId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};

/// Transitive dependency closure for every feature in a catalog.
pub type DependencyMap = HashMap<FeatureId, Vec<FeatureId>>;

/// A gate-able unit of product functionality.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feature {
    /// Stable identifier.
    pub id: FeatureId,
    /// Display name used in validation messages.
    pub name: String,
    /// Features that must be enabled before this one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dependencies: Vec<FeatureId>,
    /// Features that stop working when this one is disabled.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dependents: Vec<FeatureId>,
    /// Owning category.
    pub category: CategoryId,
    /// Core features can never be disabled.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_core: bool,
}

impl Feature {
    /// Creates a non-core feature without dependencies.
    pub fn new(id: FeatureId, name: impl Into<String>, category: CategoryId) -> Self {
        Self {
            id,
            name: name.into(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            category,
            is_core: false,
        }
    }

    /// Adds direct dependencies.
    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = FeatureId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    /// Adds declared dependents.
    pub fn with_dependents(mut self, dependents: impl IntoIterator<Item = FeatureId>) -> Self {
        self.dependents.extend(dependents);
        self
    }

    /// Marks the feature as core.
    pub fn core(mut self, on: bool) -> Self {
        self.is_core = on;
        self
    }
}

/// A named group of features.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Category {
    /// Stable identifier.
    pub id: CategoryId,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: Option<String>,
    /// Features in display order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub features: Vec<Feature>,
}

impl Category {
    /// Creates an empty category.
    pub fn new(id: CategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            features: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a feature, re-homing it into this category.
    pub fn with_feature(mut self, mut feature: Feature) -> Self {
        feature.category = self.id.clone();
        self.features.push(feature);
        self
    }
}

/// A user role. Permissions are opaque display strings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Role {
    /// Stable identifier.
    pub id: RoleId,
    /// Display name.
    pub name: String,
    /// Coarse permission labels.
    #[cfg_attr(feature = "serde", serde(default))]
    pub permissions: Vec<String>,
}

impl Role {
    /// Creates a role without permissions.
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            permissions: Vec::new(),
        }
    }

    /// Adds a permission label.
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }
}

/// Immutable, indexed view over a feature catalog.
///
/// The graph is rebuilt whenever the catalog reloads. It makes no acyclicity
/// assumption: every traversal tracks visited nodes and terminates on cycles.
#[derive(Debug, Default)]
pub struct FeatureGraph {
    categories: Vec<Category>,
    index: HashMap<FeatureId, (usize, usize)>,
    dependents: HashMap<FeatureId, Vec<FeatureId>>,
    dependency_map: OnceLock<Arc<DependencyMap>>,
}

impl FeatureGraph {
    /// Builds a graph from loaded categories.
    ///
    /// Duplicate category or feature ids reject the catalog. Each feature's
    /// `category` is normalized to the category containing it.
    pub fn new(mut categories: Vec<Category>) -> Result<Self> {
        let mut seen_categories = HashSet::new();
        let mut index = HashMap::new();

        for (ci, category) in categories.iter_mut().enumerate() {
            if !seen_categories.insert(category.id.clone()) {
                return Err(Error::InvalidCatalog(format!(
                    "duplicate category id {}",
                    category.id
                )));
            }
            let category_id = category.id.clone();
            for (fi, feature) in category.features.iter_mut().enumerate() {
                feature.category = category_id.clone();
                dedup_ids(&mut feature.dependencies);
                dedup_ids(&mut feature.dependents);
                if index.insert(feature.id.clone(), (ci, fi)).is_some() {
                    return Err(Error::InvalidCatalog(format!(
                        "duplicate feature id {}",
                        feature.id
                    )));
                }
            }
        }

        let mut dependents: HashMap<FeatureId, Vec<FeatureId>> = HashMap::new();
        for feature in categories.iter().flat_map(|c| c.features.iter()) {
            for dependency in &feature.dependencies {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(feature.id.clone());
            }
            dependents
                .entry(feature.id.clone())
                .or_default()
                .extend(feature.dependents.iter().cloned());
        }
        for ids in dependents.values_mut() {
            dedup_ids(ids);
        }

        Ok(Self {
            categories,
            index,
            dependents,
            dependency_map: OnceLock::new(),
        })
    }

    /// Returns the feature record for an id.
    pub fn feature(&self, id: &FeatureId) -> Option<&Feature> {
        let &(ci, fi) = self.index.get(id)?;
        self.categories.get(ci)?.features.get(fi)
    }

    /// Returns whether the catalog contains a feature.
    pub fn contains(&self, id: &FeatureId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the category record for an id.
    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.categories.iter().find(|category| &category.id == id)
    }

    /// Returns categories in catalog order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Iterates features in catalog order.
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.categories.iter().flat_map(|c| c.features.iter())
    }

    /// Number of features in the catalog.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns whether the catalog has no features.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Display name of a feature, falling back to its id.
    pub fn display_name<'a>(&'a self, id: &'a FeatureId) -> &'a str {
        self.feature(id)
            .map(|feature| feature.name.as_str())
            .unwrap_or(id.as_str())
    }

    /// Direct dependencies of a feature.
    pub fn dependencies(&self, id: &FeatureId) -> &[FeatureId] {
        self.feature(id)
            .map(|feature| feature.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Direct dependents of a feature: declared dependents plus reverse edges.
    pub fn dependents(&self, id: &FeatureId) -> &[FeatureId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full transitive dependency closure, nearest first, excluding `id` itself.
    ///
    /// Dependencies missing from the catalog are included but not expanded.
    pub fn transitive_dependencies(&self, id: &FeatureId) -> Vec<FeatureId> {
        self.walk(id, |graph, current| graph.dependencies(current))
    }

    /// Everything that transitively depends on `id`, nearest first.
    pub fn transitive_dependents(&self, id: &FeatureId) -> Vec<FeatureId> {
        self.walk(id, |graph, current| graph.dependents(current))
    }

    /// Memoized transitive dependency map for the whole catalog.
    pub fn dependency_map(&self) -> Arc<DependencyMap> {
        self.dependency_map
            .get_or_init(|| {
                let map = self
                    .features()
                    .map(|feature| (feature.id.clone(), self.transitive_dependencies(&feature.id)))
                    .collect();
                Arc::new(map)
            })
            .clone()
    }

    /// `(feature, missing dependency)` pairs whose dependency is not in the catalog.
    pub fn dangling_dependencies(&self) -> Vec<(FeatureId, FeatureId)> {
        self.features()
            .flat_map(|feature| {
                feature
                    .dependencies
                    .iter()
                    .filter(|dependency| !self.contains(dependency))
                    .map(|dependency| (feature.id.clone(), dependency.clone()))
            })
            .collect()
    }

    fn walk<'a, F>(&'a self, start: &FeatureId, next: F) -> Vec<FeatureId>
    where
        F: Fn(&'a Self, &FeatureId) -> &'a [FeatureId],
    {
        let mut visited = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        let mut output = Vec::new();

        while let Some(current) = queue.pop_front() {
            for neighbor in next(self, &current) {
                if visited.insert(neighbor.clone()) {
                    output.push(neighbor.clone());
                    queue.push_back(neighbor.clone());
                }
            }
        }

        output
    }
}

fn dedup_ids(ids: &mut Vec<FeatureId>) {
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}
