use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::extension::EntityProperty;
use crate::kind::PropertyKey;

/// Payload trait for property values. Blanket-implemented for any
/// comparable, debuggable, thread-safe type.
pub trait PropertyValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Type-erased equality; values of different concrete types compare
    /// unequal.
    fn dyn_eq(&self, other: &dyn PropertyValue) -> bool;
}

impl<T: Any + fmt::Debug + Send + Sync + PartialEq> PropertyValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn PropertyValue) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

/// An immutable value from a kind-specific lattice.
///
/// Properties are cheap to clone (shared allocation) and carry the
/// [`PropertyKey`] of the kind they belong to, so the solver can validate
/// that bounds and updates stay within one lattice.
#[derive(Clone)]
pub struct Property {
    key: PropertyKey,
    value: Arc<dyn PropertyValue>,
}

impl Property {
    pub fn new<P: PropertyValue>(key: PropertyKey, value: P) -> Self {
        Self {
            key,
            value: Arc::new(value),
        }
    }

    #[inline]
    pub fn key(&self) -> PropertyKey {
        self.key
    }

    pub fn downcast_ref<P: Any>(&self) -> Option<&P> {
        self.value.as_any().downcast_ref::<P>()
    }

    pub fn is<P: Any>(&self) -> bool {
        self.value.as_any().is::<P>()
    }

    /// Borrow the payload as a concrete type, panicking on a kind mix-up.
    ///
    /// Intended for lattice implementations and analyses that know the
    /// concrete value type of their kind.
    #[track_caller]
    pub fn expect_value<P: Any>(&self) -> &P {
        match self.downcast_ref::<P>() {
            Some(v) => v,
            None => panic!(
                "property of kind {:?} is not a {}",
                self.key,
                std::any::type_name::<P>()
            ),
        }
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value.dyn_eq(&*other.value)
    }
}

impl Eq for Property {}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.value, self.key.id())
    }
}

/// Per-kind lattice semantics, registered as a trait object alongside the
/// kind.
///
/// `join` must be total, associative, commutative, and idempotent over the
/// kind's properties. `is_refined` decides whether an update carries new
/// information; `check_update` is the monotonicity guard run when update
/// validation is enabled — a violation is a programmer error and the solver
/// panics with the returned message.
pub trait PropertyLattice: Send + Sync {
    /// Least upper bound of two properties of this kind.
    fn join(&self, a: &Property, b: &Property) -> Property;

    /// True iff `new` is strictly more informative than `old`.
    ///
    /// The default cannot see lattice direction, so it treats any change of
    /// bounds (and any transition towards final) as a refinement; kinds with
    /// half-lattices or non-structural orders override this.
    fn is_refined(&self, old: &EntityProperty, new: &EntityProperty) -> bool {
        default_is_refined(old, new)
    }

    /// Validate that `old -> new` is a legal monotone transition.
    fn check_update(&self, old: &EntityProperty, new: &EntityProperty) -> Result<(), String> {
        default_check_update(old, new)
    }
}

pub(crate) fn default_is_refined(old: &EntityProperty, new: &EntityProperty) -> bool {
    match (old, new) {
        (_, EntityProperty::Unknown { .. }) => false,
        (EntityProperty::Final { .. }, _) => false,
        (EntityProperty::Unknown { .. }, _) => true,
        (EntityProperty::Interim { .. }, EntityProperty::Final { .. }) => true,
        (
            EntityProperty::Interim { lower, upper, .. },
            EntityProperty::Interim {
                lower: new_lower,
                upper: new_upper,
                ..
            },
        ) => lower != new_lower || upper != new_upper,
    }
}

pub(crate) fn default_check_update(
    old: &EntityProperty,
    new: &EntityProperty,
) -> Result<(), String> {
    if old.is_final() {
        return Err(format!("{old:?} is final and must not be updated"));
    }
    if old.entity() != new.entity() || old.key() != new.key() {
        return Err(format!(
            "update targets a different state: {old:?} -> {new:?}"
        ));
    }
    // A bound, once known, must not be dropped again.
    if old.lower().is_some() && !new.is_final() && new.lower().is_none() {
        return Err(format!("lower bound dropped: {old:?} -> {new:?}"));
    }
    if old.upper().is_some() && !new.is_final() && new.upper().is_none() {
        return Err(format!("upper bound dropped: {old:?} -> {new:?}"));
    }
    Ok(())
}
