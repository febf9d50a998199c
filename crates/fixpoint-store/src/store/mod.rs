//! The property store: façade, state map, update engine, phase lifecycle.

pub mod config;
pub mod metrics;
pub mod phase;
pub mod results;
pub mod suppression;

pub(crate) mod debug;
pub(crate) mod state;
pub(crate) mod tasks;
pub(crate) mod update;

#[cfg(test)]
pub(crate) mod tests;

use std::hash::BuildHasherDefault;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use fixpoint_common::{Entity, EntityProperty, FixpointError, KindRegistry, PropertyKey};
use parking_lot::RwLock;
use rustc_hash::FxHasher;

use self::config::StoreConfig;
use self::metrics::{MetricsSnapshot, StoreMetrics};
use self::phase::{PhaseReport, PhaseSetup, PhaseState};
use self::results::{ComputationResult, PropertyComputation};
use self::state::{EpkState, StateKey};
use self::suppression::SuppressionMatrix;
use self::tasks::TaskPool;

type StateMap = DashMap<StateKey, Arc<EpkState>, BuildHasherDefault<FxHasher>>;

pub(crate) struct StoreCore {
    pub(crate) kinds: Arc<KindRegistry>,
    pub(crate) config: StoreConfig,
    pub(crate) states: StateMap,
    /// At most one lazy computation per kind, reset per phase.
    pub(crate) lazy: RwLock<Vec<Option<PropertyComputation>>>,
    /// Triggered computations per kind, fired once per entity on the first
    /// attached value. Reset per phase.
    pub(crate) triggered: RwLock<Vec<Vec<PropertyComputation>>>,
    pub(crate) phase: RwLock<PhaseState>,
    pub(crate) tasks: Arc<TaskPool>,
    pub(crate) metrics: StoreMetrics,
    me: Weak<StoreCore>,
}

/// The user-visible property store.
///
/// Cloning is cheap and shares the underlying store; computations receive a
/// reference so they can read properties and submit nested results.
#[derive(Clone)]
pub struct PropertyStore {
    core: Arc<StoreCore>,
}

impl PropertyStore {
    pub fn new(kinds: Arc<KindRegistry>, config: StoreConfig) -> Self {
        let kind_count = kinds.len();
        let tasks = Arc::new(TaskPool::new(config.worker_threads));
        let core = Arc::new_cyclic(|me| StoreCore {
            kinds,
            config,
            states: StateMap::default(),
            lazy: RwLock::new(vec![None; kind_count]),
            triggered: RwLock::new(vec![Vec::new(); kind_count]),
            phase: RwLock::new(PhaseState::new(kind_count)),
            tasks,
            metrics: StoreMetrics::default(),
            me: me.clone(),
        });
        Self { core }
    }

    pub(crate) fn from_core(core: Arc<StoreCore>) -> Self {
        Self { core }
    }

    pub fn registry(&self) -> &Arc<KindRegistry> {
        &self.core.kinds
    }

    pub fn config(&self) -> &StoreConfig {
        &self.core.config
    }

    /// Read the current extension of `(entity, key)`.
    ///
    /// Starts the kind's lazy computation (synchronously, on the calling
    /// thread) or its fast-track seed when the pair was never touched.
    ///
    /// # Panics
    ///
    /// Panics if `key` is neither computed in the current phase nor sealed
    /// by an earlier one.
    pub fn get(&self, entity: &Entity, key: PropertyKey) -> EntityProperty {
        self.core.read(entity, key)
    }

    /// Ensure a value for `(entity, key)` is eventually computed, even if
    /// nobody reads it: triggers the lazy computation, or marks the pair so
    /// the phase end installs the kind's fallback.
    pub fn force(&self, entity: &Entity, key: PropertyKey) {
        let _ = self.core.read(entity, key);
    }

    /// Enqueue an eager computation for one entity.
    pub fn schedule_eager_computation_for_entity(
        &self,
        entity: Entity,
        computation: impl Fn(&PropertyStore, &Entity) -> ComputationResult + Send + Sync + 'static,
    ) {
        self.core.ensure_configured();
        self.core
            .spawn_computation("eager computation", entity, Arc::new(computation));
    }

    /// Enqueue an eager computation for every entity in the set.
    pub fn schedule_eager_computations_for_entities(
        &self,
        entities: impl IntoIterator<Item = Entity>,
        computation: impl Fn(&PropertyStore, &Entity) -> ComputationResult + Send + Sync + 'static,
    ) {
        self.core.ensure_configured();
        let computation: PropertyComputation = Arc::new(computation);
        for entity in entities {
            self.core
                .spawn_computation("eager computation", entity, computation.clone());
        }
    }

    /// Register the lazy computation for `key`, started on the first read
    /// or force of any entity of that kind.
    ///
    /// # Panics
    ///
    /// Panics if a lazy computation for `key` is already registered, or if
    /// `key` is not computed in the current phase.
    pub fn register_lazy_computation(
        &self,
        key: PropertyKey,
        computation: impl Fn(&PropertyStore, &Entity) -> ComputationResult + Send + Sync + 'static,
    ) {
        self.core.register_lazy(key, Arc::new(computation));
    }

    /// Register a computation fired once per entity, when the first value
    /// of kind `key` is attached to that entity's state.
    pub fn register_triggered_computation(
        &self,
        key: PropertyKey,
        computation: impl Fn(&PropertyStore, &Entity) -> ComputationResult + Send + Sync + 'static,
    ) {
        self.core.register_triggered(key, Arc::new(computation));
    }

    /// Install the kinds active in the upcoming phase and their suppression
    /// matrix. Must be called before any computation is scheduled; kinds of
    /// completed phases stay readable.
    pub fn setup_phase(&self, setup: PhaseSetup) -> Result<(), FixpointError> {
        self.core.setup_phase(setup)
    }

    /// Hand a computation result to the update engine. Analyses normally
    /// return results from their computation functions; `submit` is the
    /// escape hatch for results produced outside one.
    pub fn submit(&self, result: ComputationResult) {
        self.core.process_result(result);
    }

    /// Raise the cooperative cancellation flag: in-flight units finish,
    /// queued units are dropped, finals are kept.
    pub fn cancel(&self) {
        self.core.tasks.cancel();
    }

    /// Block until quiescence, fallback installation, and cycle resolution
    /// have all completed (or the phase was cancelled).
    pub fn wait_on_phase_completion(&self) -> Result<PhaseReport, FixpointError> {
        self.core.wait_on_phase_completion()
    }

    /// Snapshot of every non-observer state of kind `key`.
    pub fn entities(&self, key: PropertyKey) -> Vec<EntityProperty> {
        self.core.entities_of(key)
    }

    /// Number of states sealed during the current phase.
    pub fn finalized_count(&self) -> usize {
        self.core
            .metrics
            .finals
            .load(std::sync::atomic::Ordering::Relaxed) as usize
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot(self.core.tasks.executed())
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("kinds", &self.core.kinds.len())
            .field("states", &self.core.states.len())
            .finish()
    }
}

impl StoreCore {
    pub(crate) fn arc(&self) -> Arc<StoreCore> {
        self.me.upgrade().expect("property store was dropped")
    }

    pub(crate) fn lookup(&self, key: &StateKey) -> Option<Arc<EpkState>> {
        self.states.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn get_or_create(&self, key: StateKey) -> Arc<EpkState> {
        if let Some(state) = self.lookup(&key) {
            return state;
        }
        let ep = EntityProperty::unknown(key.0.clone(), key.1);
        self.states
            .entry(key)
            .or_insert_with(|| Arc::new(EpkState::new(ep)))
            .value()
            .clone()
    }

    pub(crate) fn suppression(&self) -> Arc<SuppressionMatrix> {
        self.phase.read().suppression.clone()
    }

    pub(crate) fn ensure_configured(&self) {
        if !self.phase.read().configured {
            panic!("setup_phase must be called before computations are scheduled");
        }
    }

    #[track_caller]
    pub(crate) fn check_readable(&self, key: PropertyKey) {
        let phase = self.phase.read();
        if !phase.is_active(key) && !phase.is_sealed(key) {
            panic!(
                "property kind `{}` is neither computed in the current phase nor sealed by an earlier one",
                self.kinds.name(key)
            );
        }
    }

    #[track_caller]
    pub(crate) fn check_derivable(&self, key: PropertyKey) {
        if !self.phase.read().is_active(key) {
            panic!(
                "property kind `{}` is not computed in the current phase",
                self.kinds.name(key)
            );
        }
    }

    pub(crate) fn read(&self, entity: &Entity, key: PropertyKey) -> EntityProperty {
        self.check_readable(key);
        let state_key = (entity.clone(), key);
        if let Some(state) = self.lookup(&state_key) {
            return state.snapshot();
        }

        // First touch. Fast track seeds the state with a final value
        // without waking any analysis; only kinds computed in the current
        // phase may still be seeded.
        if self.config.fast_track_enabled
            && self.phase.read().is_active(key)
            && self.kinds.has_fast_track(key)
        {
            if let Some(property) = self.kinds.fast_track(key, entity) {
                self.metrics
                    .fast_tracks_used
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.process_result(ComputationResult::Final(EntityProperty::final_value(
                    entity.clone(),
                    property,
                )));
                if let Some(state) = self.lookup(&state_key) {
                    return state.snapshot();
                }
            }
        }

        let lazy = {
            let lazy = self.lazy.read();
            lazy.get(key.as_index()).and_then(|slot| slot.clone())
        };
        let state = self.get_or_create(state_key);
        if let Some(computation) = lazy {
            if state.try_begin_lazy() {
                // Lazy computations run synchronously on the reading thread;
                // concurrent readers observe the EPK and register on it.
                let store = PropertyStore::from_core(self.arc());
                let result = computation(&store, entity);
                self.process_result(result);
            }
        }
        state.snapshot()
    }

    pub(crate) fn register_lazy(&self, key: PropertyKey, computation: PropertyComputation) {
        self.check_derivable(key);
        let mut lazy = self.lazy.write();
        let slot = &mut lazy[key.as_index()];
        if slot.is_some() {
            panic!(
                "a lazy computation for kind `{}` is already registered",
                self.kinds.name(key)
            );
        }
        *slot = Some(computation);
    }

    pub(crate) fn register_triggered(&self, key: PropertyKey, computation: PropertyComputation) {
        self.check_derivable(key);
        self.triggered.write()[key.as_index()].push(computation);
    }

    pub(crate) fn entities_of(&self, key: PropertyKey) -> Vec<EntityProperty> {
        let states: Vec<Arc<EpkState>> = self
            .states
            .iter()
            .filter(|entry| entry.key().1 == key && !entry.value().is_observer())
            .map(|entry| entry.value().clone())
            .collect();
        states.iter().map(|state| state.snapshot()).collect()
    }
}
