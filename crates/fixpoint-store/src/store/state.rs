use fixpoint_common::{Entity, EntityProperty, PropertyKey};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::results::{Continuation, PartialUpdate};

/// Identity of one (entity, kind) state in the store map.
pub(crate) type StateKey = (Entity, PropertyKey);

/// Dependee extensions a continuation was registered against.
pub(crate) type DependeeList = SmallVec<[EntityProperty; 4]>;

/// Mutable state of one (entity, kind) pair.
///
/// Every transition happens under the state's own mutex; the update engine
/// never holds two state locks at once, so the lock order across states is
/// irrelevant. The extension only tightens — updating a final state is a
/// programmer error and panics, except for the exact-value redeliveries
/// that racing with the phase wind-down can produce.
pub(crate) struct EpkState {
    /// Anonymous observer states carry continuations for results without a
    /// value of their own; they never receive fallbacks and are invisible
    /// to snapshots.
    observer: bool,
    cell: Mutex<StateCell>,
}

struct StateCell {
    ep: EntityProperty,
    continuation: Option<Continuation>,
    dependees: DependeeList,
    dependers: FxHashSet<StateKey>,
    lazy_started: bool,
}

/// Outcome of an interim update.
pub(crate) struct InterimApplied {
    pub old: EntityProperty,
    /// Dependee registrations superseded by this result; the caller removes
    /// the reverse edges.
    pub old_dependees: DependeeList,
    /// Dependers detached for notification. Suppressed dependers stay
    /// attached and are woken by the final update only.
    pub to_notify: Vec<StateKey>,
    pub suppressed: usize,
    pub refined: bool,
    /// The state left `Unknown` with this update.
    pub first_value: bool,
    /// The state was already sealed when the result arrived; nothing was
    /// installed and the result was dropped.
    pub sealed: bool,
}

/// Outcome of sealing a state.
pub(crate) struct FinalApplied {
    pub old: EntityProperty,
    pub old_dependees: DependeeList,
    /// Full depender snapshot — final notifications are never suppressed.
    pub dependers: Vec<StateKey>,
    pub first_value: bool,
}

/// Outcome of a partial (read-modify-write) update.
pub(crate) enum PartialApplied {
    Unchanged,
    Interim {
        new_ep: EntityProperty,
        applied: InterimApplied,
    },
    Final {
        new_ep: EntityProperty,
        applied: FinalApplied,
    },
}

impl EpkState {
    pub fn new(ep: EntityProperty) -> Self {
        Self::build(ep, false)
    }

    pub fn new_observer(ep: EntityProperty) -> Self {
        Self::build(ep, true)
    }

    fn build(ep: EntityProperty, observer: bool) -> Self {
        Self {
            observer,
            cell: Mutex::new(StateCell {
                ep,
                continuation: None,
                dependees: DependeeList::new(),
                dependers: FxHashSet::default(),
                lazy_started: false,
            }),
        }
    }

    #[inline]
    pub fn is_observer(&self) -> bool {
        self.observer
    }

    pub fn snapshot(&self) -> EntityProperty {
        self.cell.lock().ep.clone()
    }

    /// Claim the right to run the kind's lazy computation for this state.
    /// Exactly one caller wins.
    pub fn try_begin_lazy(&self) -> bool {
        let mut cell = self.cell.lock();
        if cell.lazy_started {
            false
        } else {
            cell.lazy_started = true;
            true
        }
    }

    /// Apply an interim result: install the new extension if it refines the
    /// current one, and (re)install the continuation and dependee set either
    /// way — the computation re-declared what it waits on.
    pub fn apply_interim(
        &self,
        new_ep: EntityProperty,
        continuation: Option<Continuation>,
        dependees: DependeeList,
        is_refined: &dyn Fn(&EntityProperty, &EntityProperty) -> bool,
        suppressed: &dyn Fn(PropertyKey) -> bool,
    ) -> InterimApplied {
        let mut cell = self.cell.lock();
        if cell.ep.is_final() {
            // A continuation consumed just before this state was sealed by
            // fallback installation or cycle resolution may still deliver
            // its result. Tolerated iff it carries no new information;
            // anything tighter than the sealed value is a lost update.
            if new_ep.upper() == cell.ep.final_property() {
                return InterimApplied {
                    old: cell.ep.clone(),
                    old_dependees: DependeeList::new(),
                    to_notify: Vec::new(),
                    suppressed: 0,
                    refined: false,
                    first_value: false,
                    sealed: true,
                };
            }
            panic!(
                "interim update of an already final state: {:?} -> {:?}",
                cell.ep, new_ep
            );
        }
        let refined = is_refined(&cell.ep, &new_ep);
        let first_value = refined && cell.ep.is_unknown();
        let old = cell.ep.clone();
        let old_dependees = std::mem::replace(&mut cell.dependees, dependees);
        cell.continuation = continuation;

        let mut to_notify = Vec::new();
        let mut suppressed_count = 0;
        if refined {
            cell.ep = new_ep;
            cell.dependers.retain(|depender| {
                if suppressed(depender.1) {
                    suppressed_count += 1;
                    true
                } else {
                    to_notify.push(depender.clone());
                    false
                }
            });
        }

        InterimApplied {
            old,
            old_dependees,
            to_notify,
            suppressed: suppressed_count,
            refined,
            first_value,
            sealed: false,
        }
    }

    /// Seal the state with a final extension. Returns `None` when the state
    /// is already sealed with the same value (a continuation raced with
    /// fallback installation or cycle resolution); a conflicting value
    /// panics.
    pub fn apply_final(&self, new_ep: EntityProperty) -> Option<FinalApplied> {
        let mut cell = self.cell.lock();
        if cell.ep.is_final() {
            if cell.ep == new_ep {
                return None;
            }
            panic!(
                "final update of an already final state: {:?} -> {:?}",
                cell.ep, new_ep
            );
        }
        Some(Self::seal(&mut cell, new_ep))
    }

    /// Seal the state iff the extension is still exactly `expected`.
    ///
    /// The phase lifecycle snapshots states before computing fallback and
    /// cycle-resolution values; a racing continuation may have moved the
    /// state in between, in which case the seal is skipped and the next
    /// quiescence pass reconsiders the state.
    pub fn seal_if_unchanged(
        &self,
        expected: &EntityProperty,
        new_ep: EntityProperty,
    ) -> Option<FinalApplied> {
        let mut cell = self.cell.lock();
        if cell.ep != *expected {
            return None;
        }
        Some(Self::seal(&mut cell, new_ep))
    }

    fn seal(cell: &mut StateCell, new_ep: EntityProperty) -> FinalApplied {
        debug_assert!(!cell.ep.is_final());
        debug_assert!(new_ep.is_final());
        let old = std::mem::replace(&mut cell.ep, new_ep);
        let first_value = old.is_unknown();
        cell.continuation = None;
        let old_dependees = std::mem::take(&mut cell.dependees);
        let dependers = cell.dependers.drain().collect();
        FinalApplied {
            old,
            old_dependees,
            dependers,
            first_value,
        }
    }

    /// Run a partial update under the lock. A `Some` return from the
    /// closure is applied exactly like an interim or final update, except
    /// that the continuation and dependee set stay untouched.
    pub fn apply_partial(
        &self,
        update: PartialUpdate,
        is_refined: &dyn Fn(&EntityProperty, &EntityProperty) -> bool,
        suppressed: &dyn Fn(PropertyKey) -> bool,
    ) -> PartialApplied {
        let mut cell = self.cell.lock();
        if cell.ep.is_final() {
            // Update functions observe the sealed value and must decline.
            let current = cell.ep.clone();
            drop(cell);
            return match update(&current) {
                None => PartialApplied::Unchanged,
                Some(new_ep) => panic!(
                    "partial update of an already final state: {current:?} -> {new_ep:?}"
                ),
            };
        }
        let Some(new_ep) = update(&cell.ep) else {
            return PartialApplied::Unchanged;
        };
        assert!(
            new_ep.entity() == cell.ep.entity() && new_ep.key() == cell.ep.key(),
            "partial update redirected to a different state: {:?} -> {:?}",
            cell.ep,
            new_ep
        );
        if new_ep.is_final() {
            let applied = Self::seal(&mut cell, new_ep.clone());
            return PartialApplied::Final { new_ep, applied };
        }
        if !is_refined(&cell.ep, &new_ep) {
            return PartialApplied::Unchanged;
        }
        let first_value = cell.ep.is_unknown();
        let old = std::mem::replace(&mut cell.ep, new_ep.clone());
        let mut to_notify = Vec::new();
        let mut suppressed_count = 0;
        cell.dependers.retain(|depender| {
            if suppressed(depender.1) {
                suppressed_count += 1;
                true
            } else {
                to_notify.push(depender.clone());
                false
            }
        });
        PartialApplied::Interim {
            new_ep,
            applied: InterimApplied {
                old,
                old_dependees: DependeeList::new(),
                to_notify,
                suppressed: suppressed_count,
                refined: true,
                first_value,
                sealed: false,
            },
        }
    }

    /// Register `depender` iff the current extension still equals the one
    /// the depender computed with (or, for suppressed edges, iff the state
    /// is not yet final). On failure the current extension is returned and
    /// the caller delivers it to the depender immediately.
    pub fn add_depender(
        &self,
        expected: &EntityProperty,
        depender: StateKey,
        always_unless_final: bool,
    ) -> Result<(), EntityProperty> {
        let mut cell = self.cell.lock();
        if cell.ep.is_final() {
            return Err(cell.ep.clone());
        }
        if always_unless_final || cell.ep == *expected {
            cell.dependers.insert(depender);
            Ok(())
        } else {
            Err(cell.ep.clone())
        }
    }

    pub fn remove_depender(&self, depender: &StateKey) {
        self.cell.lock().dependers.remove(depender);
    }

    /// Detach the pending continuation if `updated` is one of the current
    /// dependees. The dependee set is handed back so the caller can drop
    /// the reverse edges; the depender re-declares its dependees with its
    /// next interim result. `None` means another notifier already consumed
    /// the continuation, or the update is stale.
    pub fn prepare_invoke(
        &self,
        updated: &EntityProperty,
    ) -> Option<(Continuation, DependeeList)> {
        let mut cell = self.cell.lock();
        if cell.continuation.is_none() {
            return None;
        }
        let relevant = cell
            .dependees
            .iter()
            .any(|d| d.entity() == updated.entity() && d.key() == updated.key());
        if !relevant {
            return None;
        }
        let continuation = cell.continuation.take()?;
        let dependees = std::mem::take(&mut cell.dependees);
        Some((continuation, dependees))
    }

    /// Install a continuation and dependee set without touching the value.
    /// Used for observer states backing value-less interim results.
    pub fn install_observer(&self, continuation: Continuation, dependees: DependeeList) {
        let mut cell = self.cell.lock();
        cell.continuation = Some(continuation);
        cell.dependees = dependees;
    }

    /// Depender snapshot for diagnostics.
    pub fn dependers_snapshot(&self) -> Vec<StateKey> {
        self.cell.lock().dependers.iter().cloned().collect()
    }

    /// Dependee snapshot for diagnostics.
    pub fn dependees_snapshot(&self) -> DependeeList {
        self.cell.lock().dependees.clone()
    }
}
