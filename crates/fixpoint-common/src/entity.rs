use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Payload trait for entities. Blanket-implemented for any debuggable,
/// thread-safe type, so callers wrap their program elements directly.
pub trait EntityData: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> EntityData for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An opaque handle to a program element (class, method, field, statement,
/// allocation site, whole-project handle, ...).
///
/// Entities compare and hash by identity — two handles are equal iff they
/// point at the same allocation. The solver never inspects the payload;
/// analyses recover it with [`Entity::downcast_ref`].
#[derive(Clone)]
pub struct Entity {
    data: Arc<dyn EntityData>,
}

impl Entity {
    pub fn new<T: EntityData>(data: T) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Borrow the payload as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        let any: &dyn Any = &*self.data;
        any.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        let any: &dyn Any = &*self.data;
        any.is::<T>()
    }

    #[inline]
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.data).cast::<()>() as usize
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data.fmt(f)
    }
}
