//! Surfaced (non-fatal) errors of the solver crates.
//!
//! Programmer errors — non-monotone updates, mutation of a final state,
//! duplicate lazy producers, out-of-phase reads, duplicate kind names —
//! indicate bugs in an analysis or its wiring and panic at the point of
//! detection instead of travelling through this type.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FixpointError {
    /// An analysis panicked inside a computation or continuation. The phase
    /// still winds down: finals computed so far are kept and untouched
    /// states receive their kind's fallback.
    #[error("analysis computation panicked ({context}): {message}")]
    AnalysisPanicked { context: String, message: String },

    /// The analysis set cannot be partitioned into consistent phases.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A phase setup or suppression declaration referenced a kind that was
    /// never registered.
    #[error("unknown property kind `{0}`")]
    UnknownKind(String),
}
