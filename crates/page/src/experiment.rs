//! Page-wide experiment diversion
//!
//! Each experiment is assigned at most once per page: the first eligible
//! slot that evaluates it picks a branch uniformly at random, and every later
//! eligible slot reads the same branch. Ineligible slots never receive it.
//! Diversion runs synchronously under the page lock, so slots built in the
//! same tick still observe a single winner.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Experiment that chooses where a slot's format comes from
pub const SIZE_FROM_ATTRIBUTES: &str = "size-from-attributes";

/// Control branch: format from the measured layout box
pub const SIZE_CONTROL_BRANCH: &str = "21068092";

/// Experiment branch: format from the width/height attributes
pub const SIZE_EXPERIMENT_BRANCH: &str = "21068093";

/// Errors raised by experiment registration and forcing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExperimentError {
    #[error("unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("experiment {0} has no branches")]
    NoBranches(String),

    #[error("branch {branch} is not a candidate of experiment {experiment}")]
    UnknownBranch { experiment: String, branch: String },

    #[error("experiment {experiment} already assigned to branch {branch}")]
    AlreadyAssigned { experiment: String, branch: String },
}

/// Slot attributes an eligibility predicate may inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotAttributes {
    /// Width attribute, when it is an explicit pixel value
    pub explicit_width: Option<u32>,
    /// Height attribute, when it is an explicit pixel value
    pub explicit_height: Option<u32>,
    /// Slot is governed by a responsive-size collaborator
    pub has_responsive: bool,
    /// Slot is a single-page story ad
    pub is_story_ad: bool,
}

/// Eligibility predicate over slot attributes
pub type Eligibility = Arc<dyn Fn(&SlotAttributes) -> bool + Send + Sync>;

/// Definition of one experiment
#[derive(Clone)]
pub struct ExperimentInfo {
    eligible: Eligibility,
    branches: Vec<String>,
}

impl ExperimentInfo {
    pub fn new<F>(branches: Vec<String>, eligible: F) -> Self
    where
        F: Fn(&SlotAttributes) -> bool + Send + Sync + 'static,
    {
        Self {
            eligible: Arc::new(eligible),
            branches,
        }
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn is_eligible(&self, attrs: &SlotAttributes) -> bool {
        (self.eligible)(attrs)
    }
}

impl fmt::Debug for ExperimentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentInfo")
            .field("branches", &self.branches)
            .finish_non_exhaustive()
    }
}

/// Definition of the size-source experiment
pub fn size_from_attributes_experiment() -> ExperimentInfo {
    ExperimentInfo::new(
        vec![
            SIZE_CONTROL_BRANCH.to_string(),
            SIZE_EXPERIMENT_BRANCH.to_string(),
        ],
        |attrs| {
            attrs.explicit_width.is_some() && attrs.explicit_height.is_some() && !attrs.has_responsive
        },
    )
}

/// Branches that apply to one slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotExperiments {
    branches: BTreeMap<String, String>,
}

impl SlotExperiments {
    /// Branch of an experiment for this slot, if the slot is in it
    pub fn branch(&self, experiment: &str) -> Option<&str> {
        self.branches.get(experiment).map(String::as_str)
    }

    /// Whether the slot is in the given branch
    pub fn is_in(&self, experiment: &str, branch: &str) -> bool {
        self.branch(experiment) == Some(branch)
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Comma-joined branch ids, ordered by experiment name
    pub fn eid(&self) -> Option<String> {
        if self.branches.is_empty() {
            return None;
        }
        Some(
            self.branches
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Assigns slots to experiment branches, once per experiment per page
pub struct ExperimentDiverter {
    experiments: BTreeMap<String, ExperimentInfo>,
    assignments: BTreeMap<String, String>,
    rng: StdRng,
}

impl fmt::Debug for ExperimentDiverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentDiverter")
            .field("experiments", &self.experiments)
            .field("assignments", &self.assignments)
            .finish_non_exhaustive()
    }
}

impl ExperimentDiverter {
    /// Create a diverter with no experiments, seeded from OS entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a diverter with a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            experiments: BTreeMap::new(),
            assignments: BTreeMap::new(),
            rng,
        }
    }

    /// Register the experiments every slot controller runs
    pub fn with_default_experiments(mut self) -> Self {
        self.experiments.insert(
            SIZE_FROM_ATTRIBUTES.to_string(),
            size_from_attributes_experiment(),
        );
        self
    }

    /// Register an experiment
    ///
    /// Re-registering a name replaces its definition but never an assignment
    /// already made on this page.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        info: ExperimentInfo,
    ) -> Result<(), ExperimentError> {
        let name = name.into();
        if info.branches.is_empty() {
            return Err(ExperimentError::NoBranches(name));
        }
        self.experiments.insert(name, info);
        Ok(())
    }

    /// Evaluate every experiment for one slot
    ///
    /// Experiments not yet assigned on this page are assigned now when the
    /// slot is eligible. The result lists only the experiments the slot is
    /// eligible for.
    pub fn divert(&mut self, attrs: &SlotAttributes) -> SlotExperiments {
        let mut branches = BTreeMap::new();

        for (name, info) in &self.experiments {
            if !info.is_eligible(attrs) {
                continue;
            }

            let branch = match self.assignments.get(name) {
                Some(existing) => existing.clone(),
                None => {
                    let pick = self.rng.gen_range(0..info.branches.len());
                    let chosen = info.branches[pick].clone();
                    tracing::info!(experiment = %name, branch = %chosen, "Experiment assigned");
                    self.assignments.insert(name.clone(), chosen.clone());
                    chosen
                }
            };
            branches.insert(name.clone(), branch);
        }

        SlotExperiments { branches }
    }

    /// Page-wide assignment of an experiment, if made
    pub fn assignment(&self, experiment: &str) -> Option<&str> {
        self.assignments.get(experiment).map(String::as_str)
    }

    /// Pin an experiment to a branch before any slot evaluates it
    pub fn force_branch(&mut self, experiment: &str, branch: &str) -> Result<(), ExperimentError> {
        let info = self
            .experiments
            .get(experiment)
            .ok_or_else(|| ExperimentError::UnknownExperiment(experiment.to_string()))?;

        if !info.branches.iter().any(|b| b == branch) {
            return Err(ExperimentError::UnknownBranch {
                experiment: experiment.to_string(),
                branch: branch.to_string(),
            });
        }

        if let Some(existing) = self.assignments.get(experiment) {
            return Err(ExperimentError::AlreadyAssigned {
                experiment: experiment.to_string(),
                branch: existing.clone(),
            });
        }

        self.assignments
            .insert(experiment.to_string(), branch.to_string());
        Ok(())
    }

    /// Drop all assignments
    pub fn reset(&mut self) {
        self.assignments.clear();
    }
}

impl Default for ExperimentDiverter {
    fn default() -> Self {
        Self::new()
    }
}
