use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use async_trait::async_trait;
use crate::graph::{Category, Role};
use crate::store::{CatalogStore, MatrixStore, UserStore};
use crate::types::{FeatureId, RoleId};

/// In-memory store implementation for tests and demos.
///
/// Every successful write is appended to a log, and loads or writes can be
/// made to fail to exercise the engine's recovery paths.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    categories: RwLock<Vec<Category>>,
    roles: RwLock<Vec<Role>>,
    role_features: RwLock<HashMap<RoleId, Vec<FeatureId>>>,
    user_counts: RwLock<HashMap<RoleId, u64>>,
    writes: RwLock<Vec<(RoleId, Vec<FeatureId>)>>,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a category.
    pub fn add_category(&self, category: Category) {
        let mut guard = self.inner.categories.write().expect("poisoned lock");
        guard.push(category);
    }

    /// Appends a role.
    pub fn add_role(&self, role: Role) {
        let mut guard = self.inner.roles.write().expect("poisoned lock");
        guard.push(role);
    }

    /// Sets the persisted features of a role.
    pub fn set_role_features(&self, role: RoleId, features: impl IntoIterator<Item = FeatureId>) {
        let mut guard = self.inner.role_features.write().expect("poisoned lock");
        guard.insert(role, features.into_iter().collect());
    }

    /// Sets how many users hold a role.
    pub fn set_user_count(&self, role: RoleId, count: u64) {
        let mut guard = self.inner.user_counts.write().expect("poisoned lock");
        guard.insert(role, count);
    }

    /// Makes subsequent catalog and matrix loads fail.
    pub fn set_fail_loads(&self, fail: bool) {
        self.inner.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes in the order they happened.
    pub fn writes(&self) -> Vec<(RoleId, Vec<FeatureId>)> {
        self.inner.writes.read().expect("poisoned lock").clone()
    }

    /// Persisted features of a role.
    pub fn role_features(&self, role: &RoleId) -> Vec<FeatureId> {
        let guard = self.inner.role_features.read().expect("poisoned lock");
        guard.get(role).cloned().unwrap_or_default()
    }

    fn check_load(&self) -> std::result::Result<(), crate::StoreError> {
        if self.inner.fail_loads.load(Ordering::SeqCst) {
            return Err("memory store load failure".into());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn load_feature_categories(
        &self,
    ) -> std::result::Result<Vec<Category>, crate::StoreError> {
        self.check_load()?;
        Ok(self.inner.categories.read().expect("poisoned lock").clone())
    }

    async fn load_roles(&self) -> std::result::Result<Vec<Role>, crate::StoreError> {
        self.check_load()?;
        Ok(self.inner.roles.read().expect("poisoned lock").clone())
    }
}

#[async_trait]
impl MatrixStore for MemoryStore {
    async fn load_role_features(
        &self,
        role: RoleId,
    ) -> std::result::Result<Vec<FeatureId>, crate::StoreError> {
        self.check_load()?;
        Ok(self.role_features(&role))
    }

    async fn write_role_features(
        &self,
        role: RoleId,
        features: Vec<FeatureId>,
    ) -> std::result::Result<(), crate::StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(format!("memory store write failure for {role}").into());
        }
        self.inner
            .role_features
            .write()
            .expect("poisoned lock")
            .insert(role.clone(), features.clone());
        self.inner
            .writes
            .write()
            .expect("poisoned lock")
            .push((role, features));
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn count_users_with_role(
        &self,
        role: RoleId,
    ) -> std::result::Result<u64, crate::StoreError> {
        let guard = self.inner.user_counts.read().expect("poisoned lock");
        Ok(guard.get(&role).copied().unwrap_or(0))
    }
}
