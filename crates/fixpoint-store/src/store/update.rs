//! Result integration: monotone updates, edge maintenance, notification.
//!
//! Lock discipline: at most one state lock is held at any point. Walking
//! the reverse edges therefore happens on snapshots taken while the source
//! state was locked; a notification that races with a newer update is
//! superseded by a strictly tighter one, never lost.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use fixpoint_common::{Entity, EntityProperty, PropertyKey};

use super::results::{ComputationResult, Continuation, PartialUpdate, PropertyComputation};
use super::state::{EpkState, PartialApplied, StateKey};
use super::suppression::SuppressionMatrix;
use super::tasks::TaskPool;
use super::{PropertyStore, StoreCore};

/// Marker payload of anonymous observer states backing value-less interim
/// results.
#[derive(Debug)]
struct InterimObserver;

impl StoreCore {
    pub(crate) fn process_result(&self, result: ComputationResult) {
        match result {
            ComputationResult::NoResult => {}
            ComputationResult::Final(ep) => self.process_final(ep),
            ComputationResult::MultiFinal(eps) => {
                for ep in eps {
                    self.process_final(ep);
                }
            }
            ComputationResult::Batch(results) => {
                for result in results {
                    self.process_result(result);
                }
            }
            ComputationResult::Interim {
                ep,
                dependees,
                continuation,
            } => self.process_interim(ep, dependees, continuation),
            ComputationResult::Partial {
                entity,
                key,
                update,
            } => self.process_partial(entity, key, update),
            ComputationResult::InterimPartial {
                dependees,
                continuation,
            } => self.process_interim_partial(dependees, continuation),
        }
    }

    fn process_final(&self, ep: EntityProperty) {
        assert!(ep.is_final(), "Final result without a final property: {ep:?}");
        let key = ep.key();
        self.check_derivable(key);
        let state_key = (ep.entity().clone(), key);
        let state = self.get_or_create(state_key.clone());
        let Some(applied) = state.apply_final(ep.clone()) else {
            // Already sealed with the same value by fallback installation
            // or cycle resolution.
            self.metrics.updates_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if self.config.validate_updates {
            if let Err(message) = self.kinds.lattice(key).check_update(&applied.old, &ep) {
                panic!("non-monotone final update for {:?}: {message}", state_key.0);
            }
        }
        self.metrics.updates_applied.fetch_add(1, Ordering::Relaxed);
        self.metrics.finals.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: "fixpoint::store", ep = ?ep, "sealed");

        if applied.first_value {
            self.fire_triggered(ep.entity(), key);
        }
        self.unregister_from(&state_key, &applied.old_dependees);
        for depender in applied.dependers {
            self.notify_depender(depender, &ep);
        }
    }

    fn process_interim(
        &self,
        ep: EntityProperty,
        dependees: Vec<EntityProperty>,
        continuation: Continuation,
    ) {
        assert!(
            matches!(ep, EntityProperty::Interim { .. }),
            "interim result must carry interim bounds: {ep:?}"
        );
        assert!(
            !dependees.is_empty(),
            "interim result without dependees; emit a final result instead"
        );
        let key = ep.key();
        self.check_derivable(key);
        let depender_key = (ep.entity().clone(), key);
        let state = self.get_or_create(depender_key.clone());
        let suppression = self.suppression();
        let lattice = self.kinds.lattice(key);

        let applied = state.apply_interim(
            ep.clone(),
            Some(continuation),
            dependees.iter().cloned().collect(),
            &|old, new| lattice.is_refined(old, new),
            &|depender_kind| suppression.suppresses(depender_kind, key),
        );
        if applied.sealed {
            self.metrics.updates_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.config.validate_updates && applied.refined {
            if let Err(message) = lattice.check_update(&applied.old, &ep) {
                panic!("non-monotone update for {:?}: {message}", depender_key.0);
            }
        }
        if applied.refined {
            self.metrics.updates_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.updates_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics
            .notifications_suppressed
            .fetch_add(applied.suppressed as u64, Ordering::Relaxed);

        if applied.first_value {
            self.fire_triggered(ep.entity(), key);
        }
        self.unregister_from(&depender_key, &applied.old_dependees);
        self.register_dependees(&depender_key, &state, &dependees, &suppression);
        for depender in applied.to_notify {
            self.notify_depender(depender, &ep);
        }
    }

    fn process_partial(&self, entity: Entity, key: PropertyKey, update: PartialUpdate) {
        self.check_derivable(key);
        let state_key = (entity, key);
        let state = self.get_or_create(state_key.clone());
        let suppression = self.suppression();
        let lattice = self.kinds.lattice(key);

        let outcome = state.apply_partial(
            update,
            &|old, new| lattice.is_refined(old, new),
            &|depender_kind| suppression.suppresses(depender_kind, key),
        );
        match outcome {
            PartialApplied::Unchanged => {
                self.metrics.updates_dropped.fetch_add(1, Ordering::Relaxed);
            }
            PartialApplied::Interim { new_ep, applied } => {
                if self.config.validate_updates {
                    if let Err(message) = lattice.check_update(&applied.old, &new_ep) {
                        panic!("non-monotone partial update for {:?}: {message}", state_key.0);
                    }
                }
                self.metrics.updates_applied.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .notifications_suppressed
                    .fetch_add(applied.suppressed as u64, Ordering::Relaxed);
                if applied.first_value {
                    self.fire_triggered(new_ep.entity(), key);
                }
                for depender in applied.to_notify {
                    self.notify_depender(depender, &new_ep);
                }
            }
            PartialApplied::Final { new_ep, applied } => {
                if self.config.validate_updates {
                    if let Err(message) = lattice.check_update(&applied.old, &new_ep) {
                        panic!("non-monotone partial update for {:?}: {message}", state_key.0);
                    }
                }
                self.metrics.updates_applied.fetch_add(1, Ordering::Relaxed);
                self.metrics.finals.fetch_add(1, Ordering::Relaxed);
                if applied.first_value {
                    self.fire_triggered(new_ep.entity(), key);
                }
                self.unregister_from(&state_key, &applied.old_dependees);
                for depender in applied.dependers {
                    self.notify_depender(depender, &new_ep);
                }
            }
        }
    }

    fn process_interim_partial(&self, dependees: Vec<EntityProperty>, continuation: Continuation) {
        assert!(
            !dependees.is_empty(),
            "interim partial result without dependees"
        );
        // The continuation has no state of its own to live on; it is
        // attached to a fresh anonymous observer keyed by the first
        // dependee's kind.
        let key = dependees[0].key();
        let observer_entity = Entity::new(InterimObserver);
        let observer_key = (observer_entity.clone(), key);
        let state = Arc::new(EpkState::new_observer(EntityProperty::unknown(
            observer_entity,
            key,
        )));
        self.states.insert(observer_key.clone(), state.clone());
        state.install_observer(continuation, dependees.iter().cloned().collect());
        let suppression = self.suppression();
        self.register_dependees(&observer_key, &state, &dependees, &suppression);
    }

    /// Point the reverse edges of `dependees` at `depender`. A dependee
    /// that moved since the computation read it fails the compare-and-set;
    /// the pending continuation is then invoked immediately with the
    /// current value — the standard mechanism for updates that raced with
    /// registration. Suppressed edges register unconditionally unless the
    /// dependee is already final.
    pub(crate) fn register_dependees(
        &self,
        depender: &StateKey,
        depender_state: &Arc<EpkState>,
        dependees: &[EntityProperty],
        suppression: &SuppressionMatrix,
    ) {
        for expected in dependees {
            let dependee_key = (expected.entity().clone(), expected.key());
            assert!(
                dependee_key != *depender,
                "a computation cannot depend on its own property: {depender:?}"
            );
            let dependee_state = self.get_or_create(dependee_key);
            let always = suppression.suppresses(depender.1, expected.key());
            match dependee_state.add_depender(expected, depender.clone(), always) {
                Ok(()) => {}
                Err(current) => {
                    if let Some((continuation, freed)) = depender_state.prepare_invoke(&current) {
                        self.unregister_from(depender, &freed);
                        self.metrics
                            .notifications_delivered
                            .fetch_add(1, Ordering::Relaxed);
                        self.spawn_continuation(continuation, current);
                    }
                    // Either way the continuation is gone; remaining
                    // registrations would never be consumed.
                    break;
                }
            }
        }
    }

    /// Drop the reverse edges `depender` held on `dependees`.
    pub(crate) fn unregister_from(&self, depender: &StateKey, dependees: &[EntityProperty]) {
        for dependee in dependees {
            let dependee_key = (dependee.entity().clone(), dependee.key());
            if let Some(state) = self.lookup(&dependee_key) {
                state.remove_depender(depender);
            }
        }
    }

    /// Wake one depender with the updated dependee extension. A `None` from
    /// `prepare_invoke` means another notifier got there first; its
    /// continuation will observe a value at least as tight as `updated`.
    pub(crate) fn notify_depender(&self, depender: StateKey, updated: &EntityProperty) {
        let Some(state) = self.lookup(&depender) else {
            return;
        };
        if let Some((continuation, freed)) = state.prepare_invoke(updated) {
            self.unregister_from(&depender, &freed);
            self.metrics
                .notifications_delivered
                .fetch_add(1, Ordering::Relaxed);
            self.spawn_continuation(continuation, updated.clone());
        }
    }

    pub(crate) fn spawn_computation(
        &self,
        context: &'static str,
        entity: Entity,
        computation: PropertyComputation,
    ) {
        let core = self.arc();
        TaskPool::spawn(&self.tasks, move || {
            let store = PropertyStore::from_core(core.clone());
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                computation(&store, &entity)
            }));
            match outcome {
                Ok(result) => core.process_result(result),
                Err(payload) => core.tasks.fail(context, payload),
            }
        });
    }

    pub(crate) fn spawn_continuation(&self, continuation: Continuation, updated: EntityProperty) {
        let core = self.arc();
        TaskPool::spawn(&self.tasks, move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                continuation(updated)
            }));
            match outcome {
                Ok(result) => core.process_result(result),
                Err(payload) => core.tasks.fail("update continuation", payload),
            }
        });
    }

    /// Fire the triggered computations of `key` for an entity whose state
    /// just picked up its first value.
    pub(crate) fn fire_triggered(&self, entity: &Entity, key: PropertyKey) {
        let computations: Vec<PropertyComputation> = {
            let triggered = self.triggered.read();
            match triggered.get(key.as_index()) {
                Some(fns) => fns.clone(),
                None => return,
            }
        };
        for computation in computations {
            self.spawn_computation("triggered computation", entity.clone(), computation);
        }
    }
}
