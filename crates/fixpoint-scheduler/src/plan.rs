//! Phase planning: producer/consumer graph, strongly connected components,
//! and greedy batching into store-compatible phases.
//!
//! Kinds read at an interim bound may be derived in the same phase —
//! dependency cycles among them are the update engine's job. A
//! [`Bound::FinalValue`] use is the one thing that forces a phase
//! boundary: the consumer runs after the producer's phase sealed the kind.

use fixpoint_common::{FixpointError, PropertyKey};
use fixpoint_store::PhaseSetup;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::manifest::{Analysis, Bound};

#[derive(Debug)]
pub struct PhasePlan {
    pub phases: Vec<PlannedPhase>,
}

#[derive(Debug)]
pub struct PlannedPhase {
    /// Indices into the scheduler's analysis list, producers first.
    pub analyses: Vec<usize>,
    pub setup: PhaseSetup,
}

struct Manifests {
    derived: Vec<FxHashSet<PropertyKey>>,
    uses: Vec<Vec<(PropertyKey, Bound)>>,
    lazy: Vec<Option<PropertyKey>>,
}

pub(crate) fn plan(
    analyses: &[Box<dyn Analysis>],
    suppress: &[(PropertyKey, PropertyKey)],
) -> Result<PhasePlan, FixpointError> {
    if analyses.is_empty() {
        return Ok(PhasePlan { phases: Vec::new() });
    }

    let manifests = collect_manifests(analyses);
    validate_producers(analyses)?;

    // Producer -> consumer edges; an edge is hard when the consumer needs
    // the sealed value.
    let mut producers: FxHashMap<PropertyKey, Vec<usize>> = FxHashMap::default();
    for (index, derived) in manifests.derived.iter().enumerate() {
        for key in derived {
            producers.entry(*key).or_default().push(index);
        }
    }
    let mut edges: Vec<(usize, usize, bool)> = Vec::new();
    for (consumer, uses) in manifests.uses.iter().enumerate() {
        for (key, bound) in uses {
            let hard = matches!(bound, Bound::FinalValue);
            for &producer in producers.get(key).map(Vec::as_slice).unwrap_or(&[]) {
                if producer != consumer {
                    edges.push((producer, consumer, hard));
                }
            }
        }
    }

    let components = strongly_connected(analyses.len(), &edges);
    let mut component_of = vec![0usize; analyses.len()];
    for (index, component) in components.iter().enumerate() {
        for &node in component {
            component_of[node] = index;
        }
    }
    for &(from, to, hard) in &edges {
        if hard && component_of[from] == component_of[to] {
            return Err(FixpointError::InvalidSchedule(format!(
                "`{}` needs a final value out of its own dependency cycle",
                analyses[to].name()
            )));
        }
    }

    // Greedy batching in topological order: merge everything, break only
    // at hard edges out of the phase being assembled.
    let mut phases: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_set: FxHashSet<usize> = FxHashSet::default();
    for component in &components {
        let needs_boundary = edges.iter().any(|&(from, to, hard)| {
            hard && current_set.contains(&from) && component.contains(&to)
        });
        if needs_boundary && !current.is_empty() {
            phases.push(std::mem::take(&mut current));
            current_set.clear();
        }
        current.extend(component.iter().copied());
        current_set.extend(component.iter().copied());
    }
    if !current.is_empty() {
        phases.push(current);
    }

    // A lazily derived kind is computed on demand; demand from another
    // phase would read a sealed, never-computed kind.
    let mut phase_of = vec![0usize; analyses.len()];
    for (phase_index, members) in phases.iter().enumerate() {
        for &member in members {
            phase_of[member] = phase_index;
        }
    }
    for (producer, lazy) in manifests.lazy.iter().enumerate() {
        let Some(key) = lazy else { continue };
        for (consumer, uses) in manifests.uses.iter().enumerate() {
            if uses.iter().any(|(used, _)| used == key) && phase_of[consumer] != phase_of[producer]
            {
                return Err(FixpointError::InvalidSchedule(format!(
                    "`{}` uses the lazily derived kind of `{}` from a different phase",
                    analyses[consumer].name(),
                    analyses[producer].name()
                )));
            }
        }
    }

    let planned = phases
        .into_iter()
        .map(|members| {
            let mut active: FxHashSet<PropertyKey> = FxHashSet::default();
            for &member in &members {
                active.extend(manifests.derived[member].iter().copied());
            }
            let mut keys: Vec<PropertyKey> = active.iter().copied().collect();
            keys.sort();
            let mut setup = PhaseSetup::new(keys);
            for &(depender, dependee) in suppress {
                if active.contains(&depender) && active.contains(&dependee) {
                    setup = setup.suppress_interim(depender, dependee);
                }
            }
            PlannedPhase {
                analyses: members,
                setup,
            }
        })
        .collect();

    Ok(PhasePlan { phases: planned })
}

fn collect_manifests(analyses: &[Box<dyn Analysis>]) -> Manifests {
    let mut derived = Vec::with_capacity(analyses.len());
    let mut uses = Vec::with_capacity(analyses.len());
    let mut lazy = Vec::with_capacity(analyses.len());
    for analysis in analyses {
        let mut keys: FxHashSet<PropertyKey> = FxHashSet::default();
        keys.extend(analysis.derives_eagerly().iter().map(|b| b.key));
        keys.extend(analysis.derives_lazily().iter().map(|b| b.key));
        keys.extend(analysis.derives_collaboratively().iter().map(|b| b.key));
        derived.push(keys);
        uses.push(
            analysis
                .uses()
                .into_iter()
                .map(|b| (b.key, b.bound))
                .collect(),
        );
        lazy.push(analysis.derives_lazily().map(|b| b.key));
    }
    Manifests {
        derived,
        uses,
        lazy,
    }
}

/// Kind-level consistency over the whole analysis set: one exclusive
/// (eager or lazy) producer per kind, or any number of collaborative ones.
fn validate_producers(analyses: &[Box<dyn Analysis>]) -> Result<(), FixpointError> {
    #[derive(Default)]
    struct Derivers {
        eager: usize,
        lazy: usize,
        collaborative: usize,
    }
    let mut by_kind: FxHashMap<PropertyKey, Derivers> = FxHashMap::default();
    for analysis in analyses {
        for bound in analysis.derives_eagerly() {
            by_kind.entry(bound.key).or_default().eager += 1;
        }
        if let Some(bound) = analysis.derives_lazily() {
            by_kind.entry(bound.key).or_default().lazy += 1;
        }
        for bound in analysis.derives_collaboratively() {
            by_kind.entry(bound.key).or_default().collaborative += 1;
        }
    }
    for (key, derivers) in &by_kind {
        if derivers.lazy > 1 {
            return Err(FixpointError::InvalidSchedule(format!(
                "kind k{} has {} lazy producers, at most one is allowed",
                key.id(),
                derivers.lazy
            )));
        }
        if derivers.eager > 0 && derivers.lazy > 0 {
            return Err(FixpointError::InvalidSchedule(format!(
                "kind k{} is derived both eagerly and lazily",
                key.id()
            )));
        }
        if derivers.eager > 1 {
            return Err(FixpointError::InvalidSchedule(format!(
                "kind k{} has {} eager producers but is not derived collaboratively",
                key.id(),
                derivers.eager
            )));
        }
        if (derivers.eager + derivers.lazy) >= 1 && derivers.collaborative >= 1 {
            return Err(FixpointError::InvalidSchedule(format!(
                "kind k{} mixes exclusive and collaborative derivation",
                key.id()
            )));
        }
    }
    Ok(())
}

/// Tarjan's algorithm; components are returned in topological order of the
/// condensation (producers before consumers).
fn strongly_connected(nodes: usize, edges: &[(usize, usize, bool)]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes];
    for &(from, to, _) in edges {
        adjacency[from].push(to);
    }

    struct State {
        index: Vec<usize>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        components: Vec<Vec<usize>>,
    }

    fn connect(v: usize, adjacency: &[Vec<usize>], state: &mut State) {
        state.index[v] = state.next_index;
        state.lowlink[v] = state.next_index;
        state.next_index += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for &w in &adjacency[v] {
            if state.index[w] == UNVISITED {
                connect(w, adjacency, state);
                state.lowlink[v] = state.lowlink[v].min(state.lowlink[w]);
            } else if state.on_stack[w] {
                state.lowlink[v] = state.lowlink[v].min(state.index[w]);
            }
        }

        if state.lowlink[v] == state.index[v] {
            let mut component = Vec::new();
            loop {
                let Some(w) = state.stack.pop() else { break };
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            state.components.push(component);
        }
    }

    let mut state = State {
        index: vec![UNVISITED; nodes],
        lowlink: vec![0; nodes],
        on_stack: vec![false; nodes],
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for v in 0..nodes {
        if state.index[v] == UNVISITED {
            connect(v, &adjacency, &mut state);
        }
    }
    // Tarjan emits sinks first; reverse for producer-first order.
    state.components.reverse();
    state.components
}
