#![cfg(feature = "memory-store")]

use feature_visibility::{
    Category, CategoryId, EngineBuilder, Feature, FeatureId, MemoryStore, Role, RoleId,
};
use futures::executor::block_on;
use std::hint::black_box;
use std::time::{Duration, Instant};

const REPEATS: usize = 5;

fn report(name: &str, mut samples: Vec<Duration>, ops: usize) {
    samples.sort_unstable();
    let median = samples[REPEATS / 2];
    let total_ms = median.as_secs_f64() * 1_000.0;
    let ns_per_op = median.as_secs_f64() * 1_000_000_000.0 / ops as f64;
    println!("{name}: median={total_ms:.3} ms, ns/op={ns_per_op:.1} (ops={ops}, repeats={REPEATS})");
}

fn measure<F>(name: &str, iterations: usize, mut op: F)
where
    F: FnMut(),
{
    let samples = (0..REPEATS)
        .map(|_| {
            let start = Instant::now();
            for _ in 0..iterations {
                op();
            }
            start.elapsed()
        })
        .collect();
    report(name, samples, iterations);
}

fn feature_id(i: usize) -> FeatureId {
    FeatureId::try_from(format!("feature_{i}").as_str()).unwrap()
}

fn setup_catalog(features: usize, roles: usize) -> (MemoryStore, Vec<RoleId>) {
    let store = MemoryStore::new();
    let category = CategoryId::try_from("perf").unwrap();
    let mut entry = Category::new(category.clone(), "Perf");
    for i in 0..features {
        let mut feature = Feature::new(feature_id(i), format!("Feature {i}"), category.clone());
        if i > 0 {
            feature = feature.depends_on([feature_id(i - 1)]);
        }
        entry = entry.with_feature(feature);
    }
    store.add_category(entry);

    let role_ids: Vec<RoleId> = (0..roles)
        .map(|i| RoleId::try_from(format!("role_{i}").as_str()).unwrap())
        .collect();
    for role in &role_ids {
        store.add_role(Role::new(role.clone(), role.as_str()));
        store.set_role_features(role.clone(), (0..features / 2).map(feature_id));
    }
    (store, role_ids)
}

#[test]
#[ignore = "manual performance test; run with --ignored --nocapture"]
fn perf_validate_and_preview() {
    let (store, roles) = setup_catalog(256, 8);
    let engine = EngineBuilder::new(store).build();
    block_on(engine.ensure_loaded());
    let tail = feature_id(255);
    let middle = feature_id(64);

    measure("validate_enable_deep", 2_000, || {
        black_box(block_on(engine.validate_feature_change(&roles[0], &tail, true)));
    });
    measure("validate_disable_with_dependents", 2_000, || {
        black_box(block_on(engine.validate_feature_change(&roles[0], &middle, false)));
    });
    measure("preview_memoized", 20_000, || {
        black_box(block_on(engine.preview_role_interface(&roles[1])));
    });
}

#[test]
#[ignore = "manual performance test; run with --ignored --nocapture"]
fn perf_toggle_burst() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let roles = 64;
    let toggles_per_role = 50;

    let samples = (0..REPEATS)
        .map(|_| {
            let (store, role_ids) = setup_catalog(64, roles);
            let engine = EngineBuilder::new(store.clone())
                .quiet_period(Duration::from_millis(5))
                .build();
            let start = Instant::now();
            runtime.block_on(async {
                for role in &role_ids {
                    for i in 0..toggles_per_role {
                        let feature = feature_id(32);
                        black_box(engine.update_role_features(role, &feature, i % 2 == 0).await)
                            .ok();
                    }
                }
                engine.flush_pending().await.unwrap();
            });
            assert!(store.writes().len() <= roles);
            start.elapsed()
        })
        .collect();
    report("toggle_burst", samples, roles * toggles_per_role);
}
