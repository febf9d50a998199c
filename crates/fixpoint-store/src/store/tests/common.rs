//! Shared fixtures for the store scenario tests: a few tiny lattices and
//! entity/kind builders.

use std::collections::BTreeSet;
use std::sync::Arc;

use fixpoint_common::{
    Entity, KindRegistry, KindSpec, Property, PropertyKey, PropertyLattice,
};

use crate::store::config::StoreConfig;
use crate::store::PropertyStore;

/// Entity payload used throughout the tests.
#[derive(Debug, PartialEq)]
pub struct Label(pub String);

pub fn entity(label: &str) -> Entity {
    Entity::new(Label(label.to_string()))
}

/// i64 under `max` as join.
pub struct IntLattice;

impl PropertyLattice for IntLattice {
    fn join(&self, a: &Property, b: &Property) -> Property {
        let x = *a.expect_value::<i64>();
        let y = *b.expect_value::<i64>();
        Property::new(a.key(), x.max(y))
    }
}

pub fn int_kind(registry: &mut KindRegistry, name: &str, fallback: i64) -> PropertyKey {
    registry.register(KindSpec::new(name, Arc::new(IntLattice), move |key, _e| {
        Property::new(key, fallback)
    }))
}

/// Three-level lattice, `Bot < Mid < Top`, join is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Bot,
    Mid,
    Top,
}

pub struct LevelLattice;

impl PropertyLattice for LevelLattice {
    fn join(&self, a: &Property, b: &Property) -> Property {
        let x = *a.expect_value::<Level>();
        let y = *b.expect_value::<Level>();
        Property::new(a.key(), x.max(y))
    }
}

pub fn level_kind(registry: &mut KindRegistry, name: &str, fallback: Level) -> PropertyKey {
    registry.register(KindSpec::new(name, Arc::new(LevelLattice), move |key, _e| {
        Property::new(key, fallback)
    }))
}

/// Grow-only string set, join is union.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Strings(pub BTreeSet<String>);

impl Strings {
    pub fn of(items: &[&str]) -> Self {
        Self(items.iter().map(|s| s.to_string()).collect())
    }
}

pub struct StringsLattice;

impl PropertyLattice for StringsLattice {
    fn join(&self, a: &Property, b: &Property) -> Property {
        let mut set = a.expect_value::<Strings>().0.clone();
        set.extend(b.expect_value::<Strings>().0.iter().cloned());
        Property::new(a.key(), Strings(set))
    }
}

pub fn strings_kind(registry: &mut KindRegistry, name: &str) -> PropertyKey {
    registry.register(KindSpec::new(
        name,
        Arc::new(StringsLattice),
        move |key, _e| Property::new(key, Strings::default()),
    ))
}

pub fn new_store(registry: KindRegistry) -> PropertyStore {
    PropertyStore::new(
        Arc::new(registry),
        StoreConfig::default().with_validation(true),
    )
}

pub fn final_int(store: &PropertyStore, e: &Entity, key: PropertyKey) -> i64 {
    *store.get(e, key).expect_final().expect_value::<i64>()
}

pub fn final_level(store: &PropertyStore, e: &Entity, key: PropertyKey) -> Level {
    *store.get(e, key).expect_final().expect_value::<Level>()
}
