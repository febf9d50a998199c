//! Umbrella crate: re-exports the fixpoint layers behind feature flags.

#[cfg(feature = "common")]
pub use fixpoint_common::{
    CycleResolution, Entity, EntityData, EntityProperty, FixpointError, KindRegistry, KindSpec,
    Property, PropertyKey, PropertyLattice, PropertyValue,
};

#[cfg(feature = "store")]
pub use fixpoint_store::{
    ComputationResult, Continuation, MetricsSnapshot, PartialUpdate, PhaseReport, PhaseSetup,
    PropertyComputation, PropertyStore, StoreConfig, SuppressionMatrix,
};

#[cfg(feature = "scheduler")]
pub use fixpoint_scheduler::{
    Analysis, AnalysisScheduler, Bound, PhasePlan, PlannedPhase, PropertyBound,
};
