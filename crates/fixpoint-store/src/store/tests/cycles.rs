//! Mutually dependent states that never tighten past their seed: after
//! quiescence, cycle resolution promotes the upper bounds to final.

use std::sync::Arc;

use fixpoint_common::{
    CycleResolution, Entity, EntityProperty, KindRegistry, KindSpec, Property, PropertyKey,
};

use super::common::{entity, final_level, level_kind, new_store, Level, LevelLattice};
use crate::store::phase::PhaseSetup;
use crate::store::results::{ComputationResult, Continuation};
use crate::store::PropertyStore;

/// `K(this) = lub(Bot, K(other).ub)`, seeded with `Mid` while the other
/// side is unknown.
fn mutual_step(
    store: &PropertyStore,
    this: &Entity,
    other: &Entity,
    k: PropertyKey,
) -> ComputationResult {
    let dependee = store.get(other, k);
    let seen = dependee
        .upper()
        .map(|p| *p.expect_value::<Level>())
        .unwrap_or(Level::Mid);
    let value = Level::Bot.max(seen);
    if dependee.is_final() {
        ComputationResult::final_ep(this.clone(), Property::new(k, value))
    } else {
        ComputationResult::Interim {
            ep: EntityProperty::interim_upper(this.clone(), Property::new(k, value)),
            dependees: vec![dependee],
            continuation: mutual_continuation(this.clone(), k),
        }
    }
}

fn mutual_continuation(this: Entity, k: PropertyKey) -> Continuation {
    Box::new(move |updated: EntityProperty| {
        let seen = updated
            .upper()
            .map(|p| *p.expect_value::<Level>())
            .unwrap_or(Level::Mid);
        let value = Level::Bot.max(seen);
        if updated.is_final() {
            ComputationResult::final_ep(this.clone(), Property::new(k, value))
        } else {
            ComputationResult::Interim {
                ep: EntityProperty::interim_upper(this.clone(), Property::new(k, value)),
                dependees: vec![updated],
                continuation: mutual_continuation(this.clone(), k),
            }
        }
    })
}

#[test]
fn test_mutual_cycle_promotes_upper_bounds() {
    let mut registry = KindRegistry::new();
    let k = level_kind(&mut registry, "Reachability", Level::Bot);
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    let e1 = entity("e1");
    let e2 = entity("e2");
    let (a, b) = (e2.clone(), e1.clone());
    store.schedule_eager_computation_for_entity(e1.clone(), move |store, this| {
        mutual_step(store, this, &a, k)
    });
    store.schedule_eager_computation_for_entity(e2.clone(), move |store, this| {
        mutual_step(store, this, &b, k)
    });

    let report = store.wait_on_phase_completion().unwrap();

    assert_eq!(final_level(&store, &e1, k), Level::Mid);
    assert_eq!(final_level(&store, &e2, k), Level::Mid);
    // Both states were refinable at quiescence and get promoted in one
    // resolution pass.
    assert_eq!(report.cycles_resolved, 2);
    assert!(report.incomplete.is_empty());
}

#[test]
fn test_store_default_strategy_applies_without_kind_override() {
    use super::common::{final_int, int_kind};
    use crate::store::config::StoreConfig;

    let mut registry = KindRegistry::new();
    let k = int_kind(&mut registry, "Range", -1);
    let store = PropertyStore::new(
        Arc::new(registry),
        StoreConfig::default()
            .with_validation(true)
            .with_default_cycle_resolution(CycleResolution::PromoteLowerBound),
    );
    store.setup_phase(PhaseSetup::new([k])).unwrap();
    let e = entity("e");

    store.submit(ComputationResult::partial(e.clone(), k, move |current| {
        Some(EntityProperty::interim_bounds(
            current.entity().clone(),
            Property::new(k, 1_i64),
            Property::new(k, 9_i64),
        ))
    }));

    let report = store.wait_on_phase_completion().unwrap();
    // The kind declares no override, so the store-wide default seals the
    // lower bound.
    assert_eq!(final_int(&store, &e, k), 1);
    assert_eq!(report.cycles_resolved, 1);
}

#[test]
fn test_custom_cycle_resolution_strategy() {
    let mut registry = KindRegistry::new();
    let k = registry.register(
        KindSpec::new("Pessimistic", Arc::new(LevelLattice), |key, _e| {
            Property::new(key, Level::Bot)
        })
        .with_cycle_resolution(CycleResolution::Custom(Arc::new(|ep| {
            // Resolve refinable states pessimistically, whatever the bound.
            Property::new(ep.key(), Level::Top)
        }))),
    );
    let store = new_store(registry);
    store.setup_phase(PhaseSetup::new([k])).unwrap();

    let e1 = entity("e1");
    let e2 = entity("e2");
    let (a, b) = (e2.clone(), e1.clone());
    store.schedule_eager_computation_for_entity(e1.clone(), move |store, this| {
        mutual_step(store, this, &a, k)
    });
    store.schedule_eager_computation_for_entity(e2.clone(), move |store, this| {
        mutual_step(store, this, &b, k)
    });

    store.wait_on_phase_completion().unwrap();
    assert_eq!(final_level(&store, &e1, k), Level::Top);
    assert_eq!(final_level(&store, &e2, k), Level::Top);
}
