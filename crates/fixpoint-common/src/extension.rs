use std::fmt;

use crate::entity::Entity;
use crate::kind::PropertyKey;
use crate::property::Property;

/// The observable extension of one (entity, kind) pair.
///
/// Extensions only ever tighten: `Unknown` states pick up interim bounds,
/// interim bounds are refined, and a state is sealed with `Final`. The
/// structural [`PartialEq`] impl is what depender registration compares
/// against to detect updates that raced with it.
#[derive(Clone, PartialEq, Eq)]
pub enum EntityProperty {
    /// Queried, but no analysis has produced a value yet.
    Unknown { entity: Entity, key: PropertyKey },

    /// Refinable, with whichever bounds are currently known. At least one
    /// bound is present; kinds over half-lattices carry only one.
    Interim {
        entity: Entity,
        key: PropertyKey,
        lower: Option<Property>,
        upper: Option<Property>,
    },

    /// Stable. No further updates are possible.
    Final { entity: Entity, property: Property },
}

impl EntityProperty {
    pub fn unknown(entity: Entity, key: PropertyKey) -> Self {
        Self::Unknown { entity, key }
    }

    pub fn interim_upper(entity: Entity, upper: Property) -> Self {
        Self::Interim {
            entity,
            key: upper.key(),
            lower: None,
            upper: Some(upper),
        }
    }

    pub fn interim_lower(entity: Entity, lower: Property) -> Self {
        Self::Interim {
            entity,
            key: lower.key(),
            lower: Some(lower),
            upper: None,
        }
    }

    #[track_caller]
    pub fn interim_bounds(entity: Entity, lower: Property, upper: Property) -> Self {
        assert_eq!(
            lower.key(),
            upper.key(),
            "interim bounds must belong to one property kind"
        );
        Self::Interim {
            entity,
            key: lower.key(),
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub fn final_value(entity: Entity, property: Property) -> Self {
        Self::Final { entity, property }
    }

    pub fn entity(&self) -> &Entity {
        match self {
            Self::Unknown { entity, .. }
            | Self::Interim { entity, .. }
            | Self::Final { entity, .. } => entity,
        }
    }

    pub fn key(&self) -> PropertyKey {
        match self {
            Self::Unknown { key, .. } | Self::Interim { key, .. } => *key,
            Self::Final { property, .. } => property.key(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }

    /// True for every state that may still change: unknown or interim.
    pub fn is_refinable(&self) -> bool {
        !self.is_final()
    }

    pub fn has_upper(&self) -> bool {
        self.upper().is_some()
    }

    pub fn has_lower(&self) -> bool {
        self.lower().is_some()
    }

    /// The current upper bound. A final property is both of its bounds.
    pub fn upper(&self) -> Option<&Property> {
        match self {
            Self::Unknown { .. } => None,
            Self::Interim { upper, .. } => upper.as_ref(),
            Self::Final { property, .. } => Some(property),
        }
    }

    /// The current lower bound. A final property is both of its bounds.
    pub fn lower(&self) -> Option<&Property> {
        match self {
            Self::Unknown { .. } => None,
            Self::Interim { lower, .. } => lower.as_ref(),
            Self::Final { property, .. } => Some(property),
        }
    }

    pub fn final_property(&self) -> Option<&Property> {
        match self {
            Self::Final { property, .. } => Some(property),
            _ => None,
        }
    }

    /// The sealed property, panicking if the state is still refinable.
    #[track_caller]
    pub fn expect_final(&self) -> &Property {
        match self {
            Self::Final { property, .. } => property,
            other => panic!("expected a final property, got {other:?}"),
        }
    }
}

impl fmt::Debug for EntityProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown { entity, key } => write!(f, "Unknown({entity:?}, k{})", key.id()),
            Self::Interim {
                entity,
                lower,
                upper,
                ..
            } => {
                write!(f, "Interim({entity:?}")?;
                if let Some(lb) = lower {
                    write!(f, ", lb={lb:?}")?;
                }
                if let Some(ub) = upper {
                    write!(f, ", ub={ub:?}")?;
                }
                write!(f, ")")
            }
            Self::Final { entity, property } => write!(f, "Final({entity:?}, {property:?})"),
        }
    }
}
