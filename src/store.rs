use crate::error::StoreError;
use crate::graph::{Category, Role};
use crate::types::{FeatureId, RoleId};
use async_trait::async_trait;

/// Store interface for the feature catalog and role list.
#[async_trait]
pub trait CatalogStore {
    /// Returns every feature category with its features.
    async fn load_feature_categories(&self) -> std::result::Result<Vec<Category>, StoreError>;

    /// Returns every role.
    async fn load_roles(&self) -> std::result::Result<Vec<Role>, StoreError>;
}

/// Store interface for the persisted role-feature matrix.
#[async_trait]
pub trait MatrixStore {
    /// Returns the enabled features of a role.
    async fn load_role_features(
        &self,
        role: RoleId,
    ) -> std::result::Result<Vec<FeatureId>, StoreError>;

    /// Replaces the enabled features of a role.
    async fn write_role_features(
        &self,
        role: RoleId,
        features: Vec<FeatureId>,
    ) -> std::result::Result<(), StoreError>;
}

/// Store interface for user-to-role assignments.
#[async_trait]
pub trait UserStore {
    /// Returns how many users are currently assigned to a role.
    async fn count_users_with_role(&self, role: RoleId) -> std::result::Result<u64, StoreError>;
}

/// Composite store trait.
pub trait Store: CatalogStore + MatrixStore + UserStore + Send + Sync {}

impl<T> Store for T where T: CatalogStore + MatrixStore + UserStore + Send + Sync {}
