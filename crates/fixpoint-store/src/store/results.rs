use std::fmt;
use std::sync::Arc;

use fixpoint_common::{Entity, EntityProperty, Property, PropertyKey};

use super::PropertyStore;

/// Continuation installed with an interim result; invoked with the updated
/// dependee extension once any declared dependee changes. Consumed on
/// invocation — the next interim result re-installs one.
pub type Continuation = Box<dyn FnOnce(EntityProperty) -> ComputationResult + Send>;

/// Monotone read-modify-write of one state, run under the state's lock.
/// Returning `None` leaves the state untouched.
pub type PartialUpdate = Box<dyn FnOnce(&EntityProperty) -> Option<EntityProperty> + Send>;

/// An analysis computation: reads through the store façade, returns what it
/// learned about the entity.
pub type PropertyComputation = Arc<dyn Fn(&PropertyStore, &Entity) -> ComputationResult + Send + Sync>;

/// What an analysis hands back to the store for integration.
pub enum ComputationResult {
    /// A single final property.
    Final(EntityProperty),

    /// A batch of final properties.
    MultiFinal(Vec<EntityProperty>),

    /// A batch of results, processed atomically in order.
    Batch(Vec<ComputationResult>),

    /// An interim value plus the dependees it was computed from and the
    /// continuation to wake when any of them updates. The dependee list
    /// must not be empty — a computation with nothing left to wait on
    /// emits a final result.
    Interim {
        ep: EntityProperty,
        dependees: Vec<EntityProperty>,
        continuation: Continuation,
    },

    /// A monotone contribution to one state, for collaboratively derived
    /// kinds. Partial results never attach continuations.
    Partial {
        entity: Entity,
        key: PropertyKey,
        update: PartialUpdate,
    },

    /// No value of its own — only dependees and a continuation, to observe
    /// the progress of other computations.
    InterimPartial {
        dependees: Vec<EntityProperty>,
        continuation: Continuation,
    },

    /// Nothing to contribute for this entity in this phase.
    NoResult,
}

impl ComputationResult {
    pub fn final_ep(entity: Entity, property: Property) -> Self {
        Self::Final(EntityProperty::final_value(entity, property))
    }

    pub fn interim(
        ep: EntityProperty,
        dependees: Vec<EntityProperty>,
        continuation: impl FnOnce(EntityProperty) -> ComputationResult + Send + 'static,
    ) -> Self {
        Self::Interim {
            ep,
            dependees,
            continuation: Box::new(continuation),
        }
    }

    pub fn partial(
        entity: Entity,
        key: PropertyKey,
        update: impl FnOnce(&EntityProperty) -> Option<EntityProperty> + Send + 'static,
    ) -> Self {
        Self::Partial {
            entity,
            key,
            update: Box::new(update),
        }
    }

    pub fn interim_partial(
        dependees: Vec<EntityProperty>,
        continuation: impl FnOnce(EntityProperty) -> ComputationResult + Send + 'static,
    ) -> Self {
        Self::InterimPartial {
            dependees,
            continuation: Box::new(continuation),
        }
    }
}

impl fmt::Debug for ComputationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Final(ep) => f.debug_tuple("Final").field(ep).finish(),
            Self::MultiFinal(eps) => f.debug_tuple("MultiFinal").field(eps).finish(),
            Self::Batch(rs) => f.debug_tuple("Batch").field(rs).finish(),
            Self::Interim { ep, dependees, .. } => f
                .debug_struct("Interim")
                .field("ep", ep)
                .field("dependees", dependees)
                .finish_non_exhaustive(),
            Self::Partial { entity, key, .. } => f
                .debug_struct("Partial")
                .field("entity", entity)
                .field("key", key)
                .finish_non_exhaustive(),
            Self::InterimPartial { dependees, .. } => f
                .debug_struct("InterimPartial")
                .field("dependees", dependees)
                .finish_non_exhaustive(),
            Self::NoResult => f.write_str("NoResult"),
        }
    }
}
