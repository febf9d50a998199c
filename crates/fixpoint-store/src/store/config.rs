use std::time::Duration;

use fixpoint_common::CycleResolution;

/// Configuration for the property store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Worker threads for the continuation pool. `None` uses the hardware
    /// parallelism reported by the runtime.
    pub worker_threads: Option<usize>,

    /// Run the per-kind monotonicity check on every applied update.
    ///
    /// A failed check is a programmer error and panics. Enabled by default
    /// in debug builds.
    pub validate_updates: bool,

    /// Wall-clock budget for one phase. On expiry the cancellation flag is
    /// raised and the phase winds down cooperatively.
    pub max_phase_time: Option<Duration>,

    /// Evaluate fast-track computations on the first read of an untouched
    /// (entity, kind) pair.
    pub fast_track_enabled: bool,

    /// How still-refinable states are sealed after quiescence when their
    /// kind declares no override of its own.
    pub default_cycle_resolution: CycleResolution,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            validate_updates: cfg!(debug_assertions),
            max_phase_time: None,
            fast_track_enabled: true,
            default_cycle_resolution: CycleResolution::default(),
        }
    }
}

impl StoreConfig {
    #[inline]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    #[inline]
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.validate_updates = enable;
        self
    }

    #[inline]
    pub fn with_max_phase_time(mut self, budget: Duration) -> Self {
        self.max_phase_time = Some(budget);
        self
    }

    #[inline]
    pub fn with_fast_track(mut self, enable: bool) -> Self {
        self.fast_track_enabled = enable;
        self
    }

    #[inline]
    pub fn with_default_cycle_resolution(mut self, resolution: CycleResolution) -> Self {
        self.default_cycle_resolution = resolution;
        self
    }
}
