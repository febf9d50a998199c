//! Core types shared across the fixpoint solver crates.
//!
//! - [`Entity`]: opaque, identity-hashed handle to a program element
//! - [`Property`] / [`PropertyLattice`]: immutable lattice values and their
//!   per-kind join/refinement semantics
//! - [`PropertyKey`] / [`KindRegistry`]: dense kind ids and the startup
//!   registry of kind metadata (fallback, fast track, cycle resolution)
//! - [`EntityProperty`]: the observable extension of one (entity, kind)
//!   pair — unknown, interim with bounds, or final
//! - [`FixpointError`]: the surfaced (non-fatal) error type

pub mod entity;
pub mod error;
pub mod extension;
pub mod kind;
pub mod property;

pub use entity::{Entity, EntityData};
pub use error::FixpointError;
pub use extension::EntityProperty;
pub use kind::{CycleResolution, KindRegistry, KindSpec, PropertyKey};
pub use property::{Property, PropertyLattice, PropertyValue};
