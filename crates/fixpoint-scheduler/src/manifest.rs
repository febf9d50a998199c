use fixpoint_common::{FixpointError, PropertyKey};
use fixpoint_store::{PhaseReport, PropertyStore};

/// Which side of a property an analysis reads or derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bound {
    LowerBound,
    UpperBound,
    /// The consumer needs the sealed value: it is scheduled in a phase
    /// after the producer's.
    FinalValue,
}

/// One kind together with the bound an analysis touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyBound {
    pub key: PropertyKey,
    pub bound: Bound,
}

impl PropertyBound {
    pub fn upper(key: PropertyKey) -> Self {
        Self {
            key,
            bound: Bound::UpperBound,
        }
    }

    pub fn lower(key: PropertyKey) -> Self {
        Self {
            key,
            bound: Bound::LowerBound,
        }
    }

    pub fn final_value(key: PropertyKey) -> Self {
        Self {
            key,
            bound: Bound::FinalValue,
        }
    }
}

/// An analysis and its scheduling manifest.
///
/// `start` is the point where computations are actually submitted: eager
/// analyses schedule their entity set, lazy analyses register their
/// on-demand computation, triggered analyses hook their kind. Everything
/// before it is setup, everything after it observes the finished phase.
pub trait Analysis: Send {
    fn name(&self) -> &str;

    /// Kinds (and bounds) this analysis reads.
    fn uses(&self) -> Vec<PropertyBound>;

    /// Kinds produced exhaustively over a known entity set.
    fn derives_eagerly(&self) -> Vec<PropertyBound> {
        Vec::new()
    }

    /// At most one kind, computed on demand.
    fn derives_lazily(&self) -> Option<PropertyBound> {
        None
    }

    /// Kinds derived via partial results, possibly by several analyses.
    fn derives_collaboratively(&self) -> Vec<PropertyBound> {
        Vec::new()
    }

    fn init(&mut self, _store: &PropertyStore) -> Result<(), FixpointError> {
        Ok(())
    }

    fn before_schedule(&mut self, _store: &PropertyStore) {}

    /// Submit computations: this is the only mandatory callback.
    fn start(&mut self, store: &PropertyStore);

    fn after_phase_scheduling(&mut self, _store: &PropertyStore) {}

    fn after_phase_completion(&mut self, _store: &PropertyStore, _report: &PhaseReport) {}
}
