//! Phase lifecycle: setup, quiescence, fallback installation, cycle
//! resolution, and the completion report.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fixpoint_common::{
    CycleResolution, Entity, EntityProperty, FixpointError, PropertyKey,
};

use super::metrics::MetricsSnapshot;
use super::state::{EpkState, FinalApplied, StateKey};
use super::suppression::SuppressionMatrix;
use super::StoreCore;

/// Declaration of one phase: the kinds computed in it and the interim
/// suppression pairs (depender kind, dependee kind).
#[derive(Debug, Clone, Default)]
pub struct PhaseSetup {
    pub active: Vec<PropertyKey>,
    pub suppress: Vec<(PropertyKey, PropertyKey)>,
}

impl PhaseSetup {
    pub fn new(active: impl IntoIterator<Item = PropertyKey>) -> Self {
        Self {
            active: active.into_iter().collect(),
            suppress: Vec::new(),
        }
    }

    /// Interim updates of `dependee` will not wake dependers of kind
    /// `depender`; the final update still does.
    pub fn suppress_interim(mut self, depender: PropertyKey, dependee: PropertyKey) -> Self {
        self.suppress.push((depender, dependee));
        self
    }
}

/// What a completed (or cancelled) phase left behind.
#[derive(Debug)]
pub struct PhaseReport {
    /// States sealed during the phase, fallbacks and cycle promotions
    /// included.
    pub finals: usize,
    /// Pairs that never saw an analysis value and received their kind's
    /// fallback.
    pub fallbacks: Vec<(Entity, PropertyKey)>,
    /// Refinable states promoted to final after quiescence.
    pub cycles_resolved: usize,
    pub cancelled: bool,
    pub deadline_expired: bool,
    /// States still refinable when the phase ended. Empty on a clean
    /// completion.
    pub incomplete: Vec<EntityProperty>,
    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
}

pub(crate) struct PhaseState {
    pub configured: bool,
    active: Vec<bool>,
    sealed: Vec<bool>,
    pub suppression: Arc<SuppressionMatrix>,
}

impl PhaseState {
    pub fn new(kind_count: usize) -> Self {
        Self {
            configured: false,
            active: vec![false; kind_count],
            sealed: vec![false; kind_count],
            suppression: Arc::new(SuppressionMatrix::new(kind_count)),
        }
    }

    pub fn is_active(&self, key: PropertyKey) -> bool {
        self.active.get(key.as_index()).copied().unwrap_or(false)
    }

    pub fn is_sealed(&self, key: PropertyKey) -> bool {
        self.sealed.get(key.as_index()).copied().unwrap_or(false)
    }
}

impl StoreCore {
    pub(crate) fn setup_phase(&self, setup: PhaseSetup) -> Result<(), FixpointError> {
        let kind_count = self.kinds.len();
        for key in setup
            .active
            .iter()
            .chain(setup.suppress.iter().flat_map(|(a, b)| [a, b]))
        {
            if !self.kinds.contains(*key) {
                return Err(FixpointError::UnknownKind(format!("k{}", key.id())));
            }
        }
        let mut matrix = SuppressionMatrix::new(kind_count);
        for (depender, dependee) in &setup.suppress {
            matrix.suppress(*depender, *dependee);
        }

        {
            let mut phase = self.phase.write();
            // Kinds of finished phases stay readable.
            let previous = std::mem::replace(&mut phase.active, vec![false; kind_count]);
            for (index, was_active) in previous.into_iter().enumerate() {
                if was_active {
                    phase.sealed[index] = true;
                }
            }
            for key in &setup.active {
                phase.active[key.as_index()] = true;
            }
            phase.suppression = Arc::new(matrix);
            phase.configured = true;
        }

        // Fresh producers, counters, and flags for the new phase.
        *self.lazy.write() = vec![None; kind_count];
        *self.triggered.write() = vec![Vec::new(); kind_count];
        self.tasks.reset();
        self.metrics.reset();
        tracing::debug!(
            target: "fixpoint::store",
            kinds = setup.active.len(),
            suppressions = setup.suppress.len(),
            "phase set up"
        );
        Ok(())
    }

    pub(crate) fn wait_on_phase_completion(&self) -> Result<PhaseReport, FixpointError> {
        let started = Instant::now();
        let deadline = self.config.max_phase_time.map(|budget| started + budget);
        let mut deadline_expired = false;
        let mut fallbacks: Vec<(Entity, PropertyKey)> = Vec::new();
        let mut cycles_resolved = 0usize;

        loop {
            if !self.tasks.await_quiescence(deadline) {
                deadline_expired = true;
                tracing::warn!(target: "fixpoint::store", "phase deadline expired, cancelling");
                self.tasks.cancel();
                self.tasks.await_quiescence(None);
            }

            if let Some(error) = self.tasks.failure() {
                // A computation panicked. The phase is failed; entities it
                // would have delivered receive their kind's fallback, the
                // finals computed so far are kept.
                self.install_fallbacks(&mut fallbacks);
                tracing::error!(target: "fixpoint::store", %error, "phase failed");
                return Err(error);
            }

            if self.tasks.is_cancelled() {
                // Clean cancellation: finals are kept, refinable states are
                // left as they are.
                return Ok(self.build_report(
                    started,
                    fallbacks,
                    cycles_resolved,
                    true,
                    deadline_expired,
                ));
            }

            if self.install_fallbacks(&mut fallbacks) > 0 {
                continue;
            }
            let resolved = self.resolve_cycles();
            cycles_resolved += resolved;
            if resolved > 0 {
                continue;
            }
            break;
        }

        let report = self.build_report(started, fallbacks, cycles_resolved, false, false);
        tracing::debug!(
            target: "fixpoint::store",
            finals = report.finals,
            fallbacks = report.fallbacks.len(),
            cycles = report.cycles_resolved,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "phase completed"
        );
        Ok(report)
    }

    /// Install the kind fallback as final on every state that never saw an
    /// analysis value.
    ///
    /// Runs on the waiting thread while the pool is quiescent. All seals
    /// happen before any depender is notified, so a continuation woken by
    /// one fallback reads the others as already sealed instead of racing
    /// with the remainder of the pass. The notifications may spawn new
    /// work; the caller re-awaits quiescence.
    fn install_fallbacks(&self, log: &mut Vec<(Entity, PropertyKey)>) -> usize {
        let mut sealed: Vec<(StateKey, EntityProperty, FinalApplied)> = Vec::new();
        for ((entity, key), state) in self.state_snapshot() {
            let current = state.snapshot();
            if !current.is_unknown() {
                continue;
            }
            let property = self.kinds.fallback(key, &entity);
            let ep = EntityProperty::final_value(entity.clone(), property);
            if let Some(applied) = state.seal_if_unchanged(&current, ep.clone()) {
                self.metrics.fallbacks_installed.fetch_add(1, Ordering::Relaxed);
                self.metrics.finals.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(target: "fixpoint::store", ep = ?ep, "fallback installed");
                log.push((entity.clone(), key));
                sealed.push(((entity, key), ep, applied));
            }
        }
        let installed = sealed.len();
        for (state_key, ep, applied) in sealed {
            self.unregister_from(&state_key, &applied.old_dependees);
            for depender in applied.dependers {
                self.notify_depender(depender, &ep);
            }
        }
        installed
    }

    /// Promote every still-refinable state to final using its kind's cycle
    /// resolution strategy.
    ///
    /// Seal-all-then-notify, as for fallbacks: members of a dependency
    /// cycle are promoted from their mutually consistent bounds, and their
    /// pending continuations die with the seal instead of being woken to
    /// re-derive a value the promotion already fixed.
    fn resolve_cycles(&self) -> usize {
        let mut sealed: Vec<(StateKey, EntityProperty, FinalApplied)> = Vec::new();
        for ((entity, key), state) in self.state_snapshot() {
            let current = state.snapshot();
            if !matches!(current, EntityProperty::Interim { .. }) {
                continue;
            }
            let strategy = self
                .kinds
                .cycle_resolution(key)
                .unwrap_or(&self.config.default_cycle_resolution);
            let property = match strategy {
                CycleResolution::PromoteUpperBound => {
                    current.upper().or_else(|| current.lower()).cloned()
                }
                CycleResolution::PromoteLowerBound => {
                    current.lower().or_else(|| current.upper()).cloned()
                }
                CycleResolution::Custom(resolve) => Some(resolve(&current)),
            };
            let Some(property) = property else { continue };
            let ep = EntityProperty::final_value(entity.clone(), property);
            if let Some(applied) = state.seal_if_unchanged(&current, ep.clone()) {
                self.metrics.cycles_resolved.fetch_add(1, Ordering::Relaxed);
                self.metrics.finals.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(target: "fixpoint::store", ep = ?ep, "cycle resolved");
                sealed.push(((entity, key), ep, applied));
            }
        }
        let resolved = sealed.len();
        for (state_key, ep, applied) in sealed {
            self.unregister_from(&state_key, &applied.old_dependees);
            for depender in applied.dependers {
                self.notify_depender(depender, &ep);
            }
        }
        resolved
    }

    pub(crate) fn state_snapshot(&self) -> Vec<(StateKey, Arc<EpkState>)> {
        self.states
            .iter()
            .filter(|entry| !entry.value().is_observer())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn build_report(
        &self,
        started: Instant,
        fallbacks: Vec<(Entity, PropertyKey)>,
        cycles_resolved: usize,
        cancelled: bool,
        deadline_expired: bool,
    ) -> PhaseReport {
        let incomplete: Vec<EntityProperty> = self
            .state_snapshot()
            .into_iter()
            .map(|(_, state)| state.snapshot())
            .filter(|ep| !ep.is_final())
            .collect();
        PhaseReport {
            finals: self.metrics.finals.load(Ordering::Relaxed) as usize,
            fallbacks,
            cycles_resolved,
            cancelled,
            deadline_expired,
            incomplete,
            elapsed: started.elapsed(),
            metrics: self.metrics.snapshot(self.tasks.executed()),
        }
    }
}
