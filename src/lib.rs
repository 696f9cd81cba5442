//! Role-based feature visibility engine.
//!
//! This crate decides which application features each role may use. It keeps
//! a catalog of features grouped into categories, validates enable/disable
//! requests against the dependency graph and core-feature rules, debounces
//! rapid toggles into one write per role, applies category-wide bulk
//! operations, and previews the interface a role would see.
//!
//! Persistence sits behind the async [`Store`] traits. Use [`Engine`] for all
//! reads and mutations.
//!
//! # Examples
//!
//! Toggling a feature using the in-memory store (enable `memory-store`):
//! ```no_run
//! # #[cfg(feature = "memory-store")]
//! # async fn demo() -> feature_visibility::Result<()> {
//! use feature_visibility::{
//!     Category, CategoryId, EngineBuilder, Feature, FeatureId, MemoryStore, Role, RoleId,
//! };
//! let store = MemoryStore::new();
//! let finance = CategoryId::try_from("finance")?;
//! let expenses = FeatureId::try_from("expenses")?;
//! store.add_category(
//!     Category::new(finance.clone(), "Finance")
//!         .with_feature(Feature::new(expenses.clone(), "Expense Manager", finance)),
//! );
//! let viewer = RoleId::try_from("viewer")?;
//! store.add_role(Role::new(viewer.clone(), "Viewer"));
//!
//! let engine = EngineBuilder::new(store).build();
//! let result = engine.update_role_features(&viewer, &expenses, true).await?;
//! assert!(result.is_valid);
//! engine.flush_pending().await?;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod engine;
mod error;
mod events;
mod graph;
mod matrix;
mod notify;
mod preview;
mod queue;
mod store;
mod types;
mod validator;

#[cfg(feature = "memory-store")]
mod memory_store;

pub use crate::engine::{Engine, EngineBuilder, EngineConfig};
pub use crate::error::{Error, LOAD_FAILURE_MESSAGE, Result, StoreError};
pub use crate::events::{EngineEvent, EventBus, EventHandler, EventKind, RoleUpdate, SubscriptionId};
pub use crate::graph::{Category, DependencyMap, Feature, FeatureGraph, Role};
pub use crate::matrix::{PendingChangeSet, RoleFeatureMatrix, effective_features};
pub use crate::notify::{NoNotifier, Notifier};
pub use crate::preview::{
    AccessibilityLevel, DEFAULT_LIMITED_THRESHOLD, FeatureSummary, LIMITED_ACCESS_WARNING,
    NavigationItem, NavigationSection, RolePreview,
};
pub use crate::queue::DEFAULT_QUIET_PERIOD;
pub use crate::store::{CatalogStore, MatrixStore, Store, UserStore};
pub use crate::types::{CategoryId, FeatureId, RoleId};
pub use crate::validator::{
    BulkAction, BulkImpact, BulkOperation, CORE_DISABLE_ALL_MESSAGE, CORE_DISABLE_MESSAGE,
    CycleReport, FeatureChange, ValidationResult, detect_circular_dependencies,
    validate_change,
};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryStore;
