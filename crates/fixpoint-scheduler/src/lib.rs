//! Analysis orchestration for the fixpoint property store.
//!
//! Each analysis ships a manifest — the property kinds it *uses* and the
//! kinds it *derives* eagerly, lazily, or collaboratively — plus lifecycle
//! callbacks. The planner partitions the analyses into phases along the
//! producer/consumer graph (dependency cycles stay within one phase and
//! are left to the store's update engine), and the driver runs the phases
//! in order against one [`fixpoint_store::PropertyStore`].

pub mod manifest;
pub mod plan;
pub mod run;

pub use manifest::{Analysis, Bound, PropertyBound};
pub use plan::{PhasePlan, PlannedPhase};
pub use run::AnalysisScheduler;
