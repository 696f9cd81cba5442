#![cfg(feature = "memory-store")]

use feature_visibility::{
    AccessibilityLevel, BulkOperation, Category, CategoryId, EngineBuilder, EngineEvent,
    EventKind, Feature, FeatureId, LOAD_FAILURE_MESSAGE, MemoryStore, Notifier, Role, RoleId,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fid(value: &str) -> FeatureId {
    FeatureId::try_from(value).unwrap()
}

fn rid(value: &str) -> RoleId {
    RoleId::try_from(value).unwrap()
}

fn cid(value: &str) -> CategoryId {
    CategoryId::try_from(value).unwrap()
}

#[derive(Default)]
struct Toasts {
    messages: Mutex<Vec<(bool, String)>>,
}

impl Notifier for Toasts {
    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push((true, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push((false, message.to_string()));
    }
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_category(
        Category::new(cid("finance"), "Finance")
            .with_description("Money in, money out")
            .with_feature(Feature::new(fid("expenses"), "Expense Manager", cid("finance")).core(true))
            .with_feature(
                Feature::new(fid("analytics"), "Analytics", cid("finance"))
                    .depends_on([fid("expenses")]),
            )
            .with_feature(
                Feature::new(fid("budgets"), "Budgets", cid("finance"))
                    .depends_on([fid("analytics")]),
            ),
    );
    store.add_category(
        Category::new(cid("admin"), "Administration")
            .with_feature(Feature::new(fid("users"), "User Management", cid("admin")))
            .with_feature(Feature::new(fid("audit"), "Audit Log", cid("admin"))),
    );

    store.add_role(Role::new(rid("admin"), "Administrator").with_permission("manage"));
    store.add_role(Role::new(rid("officer"), "Account Officer").with_permission("write"));
    store.add_role(Role::new(rid("viewer"), "Viewer").with_permission("read"));

    store.set_role_features(
        rid("admin"),
        [fid("expenses"), fid("analytics"), fid("budgets"), fid("users"), fid("audit")],
    );
    store.set_role_features(rid("officer"), [fid("expenses"), fid("analytics")]);
    store.set_role_features(rid("viewer"), [fid("expenses"), fid("ghost")]);

    store.set_user_count(rid("admin"), 1);
    store.set_user_count(rid("officer"), 4);
    store.set_user_count(rid("viewer"), 20);
    store
}

#[tokio::test(start_paused = true)]
async fn toggles_should_be_debounced_into_one_persisted_write() {
    let store = seeded_store();
    let toasts = Arc::new(Toasts::default());
    let engine = EngineBuilder::new(store.clone())
        .notifier(Arc::clone(&toasts))
        .quiet_period(Duration::from_millis(500))
        .build();
    let viewer = rid("viewer");

    engine
        .update_role_features(&viewer, &fid("analytics"), true)
        .await
        .unwrap();
    engine
        .update_role_features(&viewer, &fid("budgets"), true)
        .await
        .unwrap();
    engine
        .update_role_features(&viewer, &fid("audit"), true)
        .await
        .unwrap();
    assert_eq!(engine.pending_changes(&viewer).unwrap().len(), 3);

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        store.writes(),
        vec![(
            viewer.clone(),
            vec![fid("analytics"), fid("audit"), fid("budgets"), fid("expenses")]
        )]
    );
    assert_eq!(
        toasts.messages.lock().unwrap().as_slice(),
        &[(true, "Feature access updated for Viewer".to_string())]
    );
}

#[tokio::test]
async fn unknown_matrix_ids_should_be_dropped_on_load() {
    let engine = EngineBuilder::new(seeded_store()).build();
    engine.ensure_loaded().await;

    let matrix = engine.matrix();
    assert!(matrix.is_enabled(&rid("viewer"), &fid("expenses")));
    assert!(!matrix.is_enabled(&rid("viewer"), &fid("ghost")));
    assert_eq!(engine.feature_categories().len(), 2);
    assert_eq!(engine.roles().len(), 3);
}

#[tokio::test]
async fn configuration_loaded_should_be_published_on_reload() {
    let engine = EngineBuilder::new(seeded_store()).build();
    let loads = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&loads);
    engine.subscribe(EventKind::ConfigurationLoaded, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    engine.reload().await.unwrap();

    assert_eq!(
        loads.lock().unwrap().as_slice(),
        &[EngineEvent::ConfigurationLoaded {
            features: 5,
            roles: 3,
        }]
    );
}

#[tokio::test]
async fn failed_load_should_recover_on_reload() {
    let store = seeded_store();
    store.set_fail_loads(true);
    let toasts = Arc::new(Toasts::default());
    let engine = EngineBuilder::new(store.clone())
        .notifier(Arc::clone(&toasts))
        .build();

    let preview = engine.preview_role_interface(&rid("admin")).await;
    assert_eq!(preview.accessibility_level, AccessibilityLevel::None);
    assert_eq!(engine.error().as_deref(), Some(LOAD_FAILURE_MESSAGE));
    assert!(!engine.loading());

    store.set_fail_loads(false);
    engine.reload().await.unwrap();

    assert!(engine.error().is_none());
    let preview = engine.preview_role_interface(&rid("admin")).await;
    assert_eq!(preview.accessibility_level, AccessibilityLevel::Full);
    assert_eq!(
        toasts.messages.lock().unwrap().as_slice(),
        &[(false, LOAD_FAILURE_MESSAGE.to_string())]
    );
}

#[tokio::test]
async fn partial_bulk_disable_should_keep_core_features() {
    let store = seeded_store();
    let engine = EngineBuilder::new(store.clone()).build();
    let operation = BulkOperation::disable([rid("officer"), rid("viewer")], cid("finance"));

    let impact = engine
        .calculate_bulk_operation_impact(&operation)
        .await
        .unwrap();
    assert_eq!(impact.affected_users, 24);
    assert!(impact.errors.is_empty());

    let result = engine.bulk_update_features(&operation).await.unwrap();

    assert!(result.is_valid);
    assert!(
        result
            .warnings
            .iter()
            .any(|warning| warning.contains("Expense Manager"))
    );
    assert_eq!(store.writes().len(), 2);
    assert_eq!(store.role_features(&rid("officer")), vec![fid("expenses")]);
    assert_eq!(store.role_features(&rid("viewer")), vec![fid("expenses")]);
}

#[tokio::test]
async fn bulk_enable_should_require_external_dependencies() {
    let store = MemoryStore::new();
    store.add_category(
        Category::new(cid("core"), "Core")
            .with_feature(Feature::new(fid("ledger"), "Ledger", cid("core"))),
    );
    store.add_category(
        Category::new(cid("reporting"), "Reporting").with_feature(
            Feature::new(fid("statements"), "Statements", cid("reporting"))
                .depends_on([fid("ledger")]),
        ),
    );
    store.add_role(Role::new(rid("clerk"), "Clerk"));
    let engine = EngineBuilder::new(store.clone()).build();
    let operation = BulkOperation::enable([rid("clerk")], cid("reporting"));

    let result = engine.bulk_update_features(&operation).await.unwrap();

    assert!(!result.is_valid);
    assert_eq!(result.errors, vec!["Statements requires Ledger access for Clerk"]);
    assert!(store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_write_should_keep_optimistic_state_until_retry() {
    let store = seeded_store();
    store.set_fail_writes(true);
    let engine = EngineBuilder::new(store.clone()).build();
    let officer = rid("officer");

    engine
        .update_role_features(&officer, &fid("users"), true)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(engine.error().unwrap().starts_with("Failed to update"));
    let preview = engine.preview_role_interface(&officer).await;
    assert!(preview.accessible_apps.contains(&"Administration".to_string()));
    assert!(!engine.matrix().is_enabled(&officer, &fid("users")));

    store.set_fail_writes(false);
    engine.clear_error();
    engine.flush_pending().await.unwrap();

    assert!(engine.error().is_none());
    assert!(engine.matrix().is_enabled(&officer, &fid("users")));
    assert!(engine.pending_changes(&officer).is_none());
}

#[tokio::test]
async fn cycles_in_catalog_should_be_reported() {
    let store = MemoryStore::new();
    store.add_category(
        Category::new(cid("loop"), "Loop")
            .with_feature(Feature::new(fid("a"), "A", cid("loop")).depends_on([fid("b")]))
            .with_feature(Feature::new(fid("b"), "B", cid("loop")).depends_on([fid("a")])),
    );
    let engine = EngineBuilder::new(store).build();

    let report = engine.detect_circular_dependencies().await;

    assert!(report.has_circular_dependencies);
    assert_eq!(report.cycles.len(), 1);
}
