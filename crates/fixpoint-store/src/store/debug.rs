//! Diagnostic views over the store: result triples and a dependency-graph
//! dump for analyses that fail to converge.

use std::fmt::Write as _;
use std::sync::Arc;

use fixpoint_common::{Entity, Property, PropertyKey};

use super::state::EpkState;
use super::PropertyStore;

impl PropertyStore {
    /// All sealed `(entity, kind, property)` triples.
    pub fn results(&self) -> Vec<(Entity, PropertyKey, Property)> {
        self.core
            .state_snapshot()
            .into_iter()
            .filter_map(|((entity, key), state)| {
                state
                    .snapshot()
                    .final_property()
                    .cloned()
                    .map(|property| (entity, key, property))
            })
            .collect()
    }

    /// Human-readable dump of every state with its forward and reverse
    /// edges. Line order is stable so dumps diff cleanly.
    pub fn dump_dependency_graph(&self) -> String {
        let mut lines: Vec<String> = self
            .core
            .state_snapshot()
            .into_iter()
            .map(|(state_key, state)| self.describe_state(&state_key, &state))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    fn describe_state(&self, (entity, key): &(Entity, PropertyKey), state: &Arc<EpkState>) -> String {
        let mut line = format!(
            "{}[{entity:?}]: {:?}",
            self.core.kinds.name(*key),
            state.snapshot()
        );
        let dependees = state.dependees_snapshot();
        if !dependees.is_empty() {
            let names: Vec<String> = dependees
                .iter()
                .map(|d| format!("{}[{:?}]", self.core.kinds.name(d.key()), d.entity()))
                .collect();
            let _ = write!(line, " waits_on={names:?}");
        }
        let dependers = state.dependers_snapshot();
        if !dependers.is_empty() {
            let mut names: Vec<String> = dependers
                .iter()
                .map(|(e, k)| format!("{}[{e:?}]", self.core.kinds.name(*k)))
                .collect();
            names.sort();
            let _ = write!(line, " feeds={names:?}");
        }
        line
    }
}
