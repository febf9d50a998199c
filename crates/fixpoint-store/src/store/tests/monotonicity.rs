//! Update ordering and the no-op laws: redundant updates are dropped
//! without notifications, concurrent monotone contributions converge, and
//! out-of-phase reads are rejected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fixpoint_common::{EntityProperty, KindRegistry, Property};

use super::common::{entity, final_int, int_kind, new_store};
use crate::store::phase::PhaseSetup;
use crate::store::results::ComputationResult;

#[test]
fn test_equal_interim_update_is_a_noop() {
    let mut registry = KindRegistry::new();
    let a = int_kind(&mut registry, "A", -1);
    let b = int_kind(&mut registry, "B", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([a, b])).unwrap();

    let e = entity("e");
    let woken = Arc::new(AtomicUsize::new(0));

    // A(e) waits on B(e).
    let dependee = store.get(&e, b);
    let counter = woken.clone();
    let e2 = e.clone();
    store.submit(ComputationResult::Interim {
        ep: EntityProperty::interim_upper(e.clone(), Property::new(a, 0_i64)),
        dependees: vec![dependee],
        continuation: Box::new(move |updated| {
            counter.fetch_add(1, Ordering::SeqCst);
            let v = *updated.upper().unwrap().expect_value::<i64>();
            ComputationResult::final_ep(e2, Property::new(a, v))
        }),
    });

    // Install B(e) = ub 5 twice; the second carries nothing new.
    for _ in 0..2 {
        let e3 = e.clone();
        store.submit(ComputationResult::partial(e3, b, move |current| {
            Some(EntityProperty::interim_upper(
                current.entity().clone(),
                Property::new(b, 5_i64),
            ))
        }));
    }

    let report = store.wait_on_phase_completion().unwrap();

    // Only the first update was an update; the second was dropped without
    // waking anyone.
    assert_eq!(woken.load(Ordering::SeqCst), 1);
    assert!(report.metrics.updates_dropped >= 1);
    assert_eq!(final_int(&store, &e, a), 5);
}

#[test]
fn test_concurrent_partial_updates_converge_to_join() {
    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "Max", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    let e = entity("shared");
    for i in 0..64_i64 {
        store.schedule_eager_computation_for_entity(e.clone(), move |_store, e| {
            ComputationResult::partial(e.clone(), k, move |current| {
                let seen = current
                    .upper()
                    .map(|p| *p.expect_value::<i64>())
                    .unwrap_or(i64::MIN);
                if i > seen {
                    Some(EntityProperty::interim_upper(
                        current.entity().clone(),
                        Property::new(k, i),
                    ))
                } else {
                    None
                }
            })
        });
    }

    let report = store.wait_on_phase_completion().unwrap();
    assert_eq!(final_int(&store, &e, k), 63);
    assert_eq!(report.cycles_resolved, 1);
}

#[test]
#[should_panic(expected = "neither computed in the current phase")]
fn test_reading_a_kind_outside_the_phase_panics() {
    let mut registry = KindRegistry::new();
    let active = int_kind(&mut registry, "Active", -1);
    let inactive = int_kind(&mut registry, "Inactive", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([active])).unwrap();

    store.get(&entity("e"), inactive);
}

#[test]
fn test_sealed_kinds_stay_readable_across_phases() {
    let mut registry = KindRegistry::new();
    let first = int_kind(&mut registry, "First", -1);
    let second = int_kind(&mut registry, "Second", -1);
    let store = new_store(registry);

    store.setup_phase(PhaseSetup::new([first])).unwrap();
    let e = entity("e");
    store.submit(ComputationResult::final_ep(
        e.clone(),
        Property::new(first, 10_i64),
    ));
    store.wait_on_phase_completion().unwrap();

    store.setup_phase(PhaseSetup::new([second])).unwrap();
    // The first phase's kind is sealed but still readable.
    assert_eq!(final_int(&store, &e, first), 10);

    let e2 = e.clone();
    store.schedule_eager_computation_for_entity(e.clone(), move |store, _e| {
        let base = *store.get(&e2, first).expect_final().expect_value::<i64>();
        ComputationResult::final_ep(e2.clone(), Property::new(second, base * 3))
    });
    store.wait_on_phase_completion().unwrap();
    assert_eq!(final_int(&store, &e, second), 30);
}

#[test]
fn test_observed_extensions_only_tighten() {
    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "Grows", -1);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    let e = entity("e");
    let observed = Arc::new(parking_lot::Mutex::new(Vec::<i64>::new()));

    // Writer: ascending partial updates.
    let writer_entity = e.clone();
    let writer_store = store.clone();
    let writer = std::thread::spawn(move || {
        for i in 0..100_i64 {
            let e = writer_entity.clone();
            writer_store.submit(ComputationResult::partial(e, k, move |current| {
                let seen = current
                    .upper()
                    .map(|p| *p.expect_value::<i64>())
                    .unwrap_or(i64::MIN);
                (i > seen).then(|| {
                    EntityProperty::interim_upper(
                        current.entity().clone(),
                        Property::new(k, i),
                    )
                })
            }));
        }
    });

    // Reader: every observed upper bound must be non-decreasing.
    let reader_entity = e.clone();
    let reader_store = store.clone();
    let log = observed.clone();
    let reader = std::thread::spawn(move || {
        for _ in 0..200 {
            let ep = reader_store.get(&reader_entity, k);
            if let Some(p) = ep.upper() {
                log.lock().push(*p.expect_value::<i64>());
            }
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
    store.wait_on_phase_completion().unwrap();

    let log = observed.lock();
    assert!(log.windows(2).all(|w| w[0] <= w[1]), "regressed: {log:?}");
    assert_eq!(final_int(&store, &e, k), 99);
}
