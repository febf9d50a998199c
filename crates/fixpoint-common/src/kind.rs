use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::entity::Entity;
use crate::extension::EntityProperty;
use crate::property::{Property, PropertyLattice};

/// Dense id of a registered property kind.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PropertyKey(u32);

impl PropertyKey {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Build a key from a raw id. Only meaningful for ids handed out by a
    /// [`KindRegistry`]; fixtures and tests use it to fabricate keys.
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// How a still-refinable state is sealed once the phase has quiesced.
#[derive(Clone, Default)]
pub enum CycleResolution {
    /// Seal the current upper bound (falls back to the lower bound for
    /// kinds that only track one).
    #[default]
    PromoteUpperBound,
    /// Seal the current lower bound (falls back to the upper bound).
    PromoteLowerBound,
    /// Kind-specific resolver; receives the refinable extension.
    Custom(Arc<dyn Fn(&EntityProperty) -> Property + Send + Sync>),
}

impl fmt::Debug for CycleResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PromoteUpperBound => f.write_str("PromoteUpperBound"),
            Self::PromoteLowerBound => f.write_str("PromoteLowerBound"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub type FallbackFn = Arc<dyn Fn(PropertyKey, &Entity) -> Property + Send + Sync>;
pub type FastTrackFn = Arc<dyn Fn(PropertyKey, &Entity) -> Option<Property> + Send + Sync>;

/// Declaration of one property kind: name, lattice, fallback, and the
/// optional fast-track and cycle-resolution hooks.
#[derive(Clone)]
pub struct KindSpec {
    name: String,
    lattice: Arc<dyn PropertyLattice>,
    fallback: FallbackFn,
    fast_track: Option<FastTrackFn>,
    cycle_resolution: Option<CycleResolution>,
}

impl KindSpec {
    pub fn new(
        name: impl Into<String>,
        lattice: Arc<dyn PropertyLattice>,
        fallback: impl Fn(PropertyKey, &Entity) -> Property + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            lattice,
            fallback: Arc::new(fallback),
            fast_track: None,
            cycle_resolution: None,
        }
    }

    /// Install a fast-track computation, run on the first read of an
    /// untouched (entity, kind) pair to seed the state with a final value.
    pub fn with_fast_track(
        mut self,
        fast_track: impl Fn(PropertyKey, &Entity) -> Option<Property> + Send + Sync + 'static,
    ) -> Self {
        self.fast_track = Some(Arc::new(fast_track));
        self
    }

    /// Override the store-wide default cycle-resolution strategy for this
    /// kind.
    pub fn with_cycle_resolution(mut self, resolution: CycleResolution) -> Self {
        self.cycle_resolution = Some(resolution);
        self
    }
}

struct KindInfo {
    name: String,
    lattice: Arc<dyn PropertyLattice>,
    fallback: FallbackFn,
    fast_track: Option<FastTrackFn>,
    cycle_resolution: Option<CycleResolution>,
}

/// Startup registry of property kinds.
///
/// Kinds are registered by name and receive dense ids in registration
/// order. Registration requires `&mut self`; once every kind is known the
/// registry is wrapped in an `Arc` and shared read-only with the store —
/// there is no global registry and no locking on the read path.
#[derive(Default)]
pub struct KindRegistry {
    kinds: Vec<KindInfo>,
    by_name: FxHashMap<String, PropertyKey>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind, assigning the next dense id.
    ///
    /// # Panics
    ///
    /// Panics if a kind with the same name is already registered.
    #[track_caller]
    pub fn register(&mut self, spec: KindSpec) -> PropertyKey {
        if self.by_name.contains_key(&spec.name) {
            panic!("property kind `{}` is already registered", spec.name);
        }
        let key = PropertyKey::new(self.kinds.len() as u32);
        self.by_name.insert(spec.name.clone(), key);
        self.kinds.push(KindInfo {
            name: spec.name,
            lattice: spec.lattice,
            fallback: spec.fallback,
            fast_track: spec.fast_track,
            cycle_resolution: spec.cycle_resolution,
        });
        key
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn key_of(&self, name: &str) -> Option<PropertyKey> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, key: PropertyKey) -> bool {
        key.as_index() < self.kinds.len()
    }

    #[track_caller]
    fn info(&self, key: PropertyKey) -> &KindInfo {
        match self.kinds.get(key.as_index()) {
            Some(info) => info,
            None => panic!("property kind k{} was never registered", key.id()),
        }
    }

    pub fn name(&self, key: PropertyKey) -> &str {
        &self.info(key).name
    }

    pub fn lattice(&self, key: PropertyKey) -> &dyn PropertyLattice {
        &*self.info(key).lattice
    }

    pub fn fallback(&self, key: PropertyKey, entity: &Entity) -> Property {
        (self.info(key).fallback)(key, entity)
    }

    pub fn fast_track(&self, key: PropertyKey, entity: &Entity) -> Option<Property> {
        let info = self.info(key);
        info.fast_track.as_ref().and_then(|f| f(key, entity))
    }

    pub fn has_fast_track(&self, key: PropertyKey) -> bool {
        self.info(key).fast_track.is_some()
    }

    /// The kind's declared cycle-resolution override, if any. Kinds
    /// without one follow the store's configured default.
    pub fn cycle_resolution(&self, key: PropertyKey) -> Option<&CycleResolution> {
        self.info(key).cycle_resolution.as_ref()
    }

    /// All registered keys, in id order.
    pub fn keys(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        (0..self.kinds.len() as u32).map(PropertyKey::new)
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.kinds.iter().enumerate().map(|(i, k)| (i, &k.name)))
            .finish()
    }
}
