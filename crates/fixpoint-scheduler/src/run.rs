use fixpoint_common::{FixpointError, PropertyKey};
use fixpoint_store::{PhaseReport, PropertyStore};

use crate::manifest::Analysis;
use crate::plan::{self, PhasePlan};

/// Collects analyses, plans phases, and drives them through the store.
#[derive(Default)]
pub struct AnalysisScheduler {
    analyses: Vec<Box<dyn Analysis>>,
    suppress: Vec<(PropertyKey, PropertyKey)>,
}

impl AnalysisScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, analysis: impl Analysis + 'static) -> &mut Self {
        self.analyses.push(Box::new(analysis));
        self
    }

    /// Interim updates of `dependee` will not wake dependers of kind
    /// `depender` in any phase where both kinds are computed.
    pub fn suppress_interim_updates(
        &mut self,
        depender: PropertyKey,
        dependee: PropertyKey,
    ) -> &mut Self {
        self.suppress.push((depender, dependee));
        self
    }

    pub fn plan(&self) -> Result<PhasePlan, FixpointError> {
        plan::plan(&self.analyses, &self.suppress)
    }

    /// Run all phases in order. Each phase goes through
    /// `setup_phase -> init -> before_schedule -> start ->
    /// after_phase_scheduling -> wait_on_phase_completion ->
    /// after_phase_completion`.
    pub fn run(&mut self, store: &PropertyStore) -> Result<Vec<PhaseReport>, FixpointError> {
        let plan = self.plan()?;
        let mut reports = Vec::with_capacity(plan.phases.len());
        for (index, phase) in plan.phases.into_iter().enumerate() {
            tracing::debug!(
                target: "fixpoint::scheduler",
                phase = index,
                analyses = phase.analyses.len(),
                kinds = phase.setup.active.len(),
                "starting phase"
            );
            store.setup_phase(phase.setup)?;
            for &member in &phase.analyses {
                self.analyses[member].init(store)?;
            }
            for &member in &phase.analyses {
                self.analyses[member].before_schedule(store);
            }
            for &member in &phase.analyses {
                self.analyses[member].start(store);
            }
            for &member in &phase.analyses {
                self.analyses[member].after_phase_scheduling(store);
            }
            let report = store.wait_on_phase_completion()?;
            for &member in &phase.analyses {
                self.analyses[member].after_phase_completion(store, &report);
            }
            reports.push(report);
        }
        Ok(reports)
    }
}
