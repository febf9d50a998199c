//! On-demand (lazy) and triggered computations, plus the fast-track seed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fixpoint_common::{
    EntityProperty, KindRegistry, KindSpec, Property,
};

use super::common::{entity, final_int, int_kind, new_store, IntLattice};
use crate::store::phase::PhaseSetup;
use crate::store::results::ComputationResult;

#[test]
fn test_lazy_computation_runs_once_on_first_read() {
    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "LineCount", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    store.register_lazy_computation(k, move |_store, e| {
        counter.fetch_add(1, Ordering::SeqCst);
        ComputationResult::final_ep(e.clone(), Property::new(k, 7_i64))
    });

    let e = entity("m");
    // The producer runs synchronously on the reading thread.
    assert_eq!(final_int(&store, &e, k), 7);
    assert_eq!(final_int(&store, &e, k), 7);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let report = store.wait_on_phase_completion().unwrap();
    assert!(report.fallbacks.is_empty());
}

#[test]
fn test_force_starts_the_lazy_computation() {
    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "LineCount", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    store.register_lazy_computation(k, move |_store, e| {
        ComputationResult::final_ep(e.clone(), Property::new(k, 3_i64))
    });

    let e = entity("m");
    store.force(&e, k);
    store.wait_on_phase_completion().unwrap();
    assert_eq!(final_int(&store, &e, k), 3);
}

#[test]
#[should_panic(expected = "already registered")]
fn test_duplicate_lazy_computation_panics() {
    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "LineCount", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    store.register_lazy_computation(k, move |_store, e| {
        ComputationResult::final_ep(e.clone(), Property::new(k, 1_i64))
    });
    store.register_lazy_computation(k, move |_store, e| {
        ComputationResult::final_ep(e.clone(), Property::new(k, 2_i64))
    });
}

#[test]
fn test_triggered_computation_fires_once_per_entity() {
    let mut registry = KindRegistry::new();
    let source = int_kind(&mut registry, "Source", -1);
    let derived = int_kind(&mut registry, "Derived", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([source, derived])).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    store.register_triggered_computation(source, move |_store, e| {
        counter.fetch_add(1, Ordering::SeqCst);
        ComputationResult::final_ep(e.clone(), Property::new(derived, 1_i64))
    });

    let e = entity("m");
    // First value (interim) fires the trigger; the final update must not
    // fire it again.
    store.submit(ComputationResult::partial(e.clone(), source, move |current| {
        Some(EntityProperty::interim_upper(
            current.entity().clone(),
            Property::new(source, 5_i64),
        ))
    }));
    store.submit(ComputationResult::Final(EntityProperty::final_value(
        e.clone(),
        Property::new(source, 5_i64),
    )));

    store.wait_on_phase_completion().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(final_int(&store, &e, derived), 1);
}

#[test]
fn test_fast_track_seeds_first_read() {
    let mut registry = KindRegistry::new();
    let k = registry.register(
        KindSpec::new("Seeded", Arc::new(IntLattice), |key, _e| {
            Property::new(key, 0_i64)
        })
        .with_fast_track(|key, _e| Some(Property::new(key, 42_i64))),
    );
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    let e = entity("m");
    let ep = store.get(&e, k);
    assert_eq!(ep.expect_final().expect_value::<i64>(), &42);

    let report = store.wait_on_phase_completion().unwrap();
    assert_eq!(report.metrics.fast_tracks_used, 1);
    assert!(report.fallbacks.is_empty());
}
