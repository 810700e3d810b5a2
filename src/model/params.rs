use clap::ValueEnum;
use serde::Serialize;

use crate::model::error::{SensiError, SensiResult};
use crate::model::fit::ModelOptions;

pub const DEFAULT_CUTOFF: f64 = 2.0;
pub const DEFAULT_BREAKS: [f64; 5] = [0.1, 0.2, 0.3, 0.4, 0.5];
pub const DEFAULT_SAMPLING_TIMES: usize = 30;
pub const DEFAULT_CLADE_MIN_SIZE: usize = 5;
pub const DEFAULT_NULL_TIMES: usize = 100;
pub const DEFAULT_TREE_TIMES: usize = 2;
pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Mean at the observed value, standard deviation at the declared uncertainty
    Normal,
    /// Centred on the observed value, half-width at the declared uncertainty
    Uniform,
}

/// Which perturbation to apply, with its own settings.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Plan {
    /// Leave each taxon out once.
    Influence { cutoff: f64 },
    /// Leave out a random fraction of taxa, `times` per break.
    Sampling { breaks: Vec<f64>, times: usize },
    /// Leave out each clade, with `times` size-matched random removals as the null.
    Clade { column: String, min_size: usize, times: usize },
    /// Refit across members of a tree ensemble.
    Tree { times: Option<usize> },
    /// Refit on values redrawn from their declared uncertainty.
    Intraspecific { times: usize, distribution: Distribution },
}

impl Plan {
    pub fn influence() -> Self {
        Plan::Influence { cutoff: DEFAULT_CUTOFF }
    }

    pub fn sampling() -> Self {
        Plan::Sampling { breaks: DEFAULT_BREAKS.to_vec(), times: DEFAULT_SAMPLING_TIMES }
    }

    pub fn clade(column: &str) -> Self {
        Plan::Clade { column: column.to_string(), min_size: DEFAULT_CLADE_MIN_SIZE, times: DEFAULT_NULL_TIMES }
    }

    pub fn tree() -> Self {
        Plan::Tree { times: None }
    }

    pub fn intraspecific(distribution: Distribution) -> Self {
        Plan::Intraspecific { times: DEFAULT_SAMPLING_TIMES, distribution }
    }

    pub fn validate(&self) -> SensiResult<()> {
        match self {
            Plan::Influence { cutoff } => {
                if !cutoff.is_finite() || *cutoff <= 0.0 {
                    return Err(SensiError::InvalidPlan(format!("cutoff must be positive, got {}", cutoff)));
                }
            }
            Plan::Sampling { breaks, times } => {
                if breaks.is_empty() {
                    return Err(SensiError::InvalidPlan("at least one break is required".to_string()));
                }
                if let Some(b) = breaks.iter().find(|b| !(**b > 0.0 && **b < 1.0)) {
                    return Err(SensiError::InvalidPlan(format!("breaks must lie in (0, 1), got {}", b)));
                }
                require_times(*times)?;
            }
            Plan::Clade { min_size, times, .. } => {
                if *min_size == 0 {
                    return Err(SensiError::InvalidPlan("minimum clade size must be at least 1".to_string()));
                }
                require_times(*times)?;
            }
            Plan::Tree { times } => {
                if let Some(t) = times {
                    require_times(*t)?;
                }
            }
            Plan::Intraspecific { times, .. } => require_times(*times)?,
        }
        Ok(())
    }
}

fn require_times(times: usize) -> SensiResult<()> {
    if times == 0 {
        return Err(SensiError::InvalidPlan("times must be at least 1".to_string()));
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize)]
pub struct Params {
    pub plan: Plan,
    pub cpus: usize,
    pub seed: u64,
    pub alpha: f64,
    pub options: ModelOptions,
}

impl Params {
    pub fn new(plan: Plan) -> Self {
        Self { plan, cpus: 1, seed: 42, alpha: DEFAULT_ALPHA, options: ModelOptions::default() }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> SensiResult<()> {
        if self.cpus == 0 {
            return Err(SensiError::InvalidPlan("at least one cpu is required".to_string()));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(SensiError::InvalidPlan(format!("alpha must lie in (0, 1), got {}", self.alpha)));
        }
        self.plan.validate()
    }
}

#[test]
fn test_plan_validation() {
    assert!(Params::new(Plan::sampling()).validate().is_ok());
    assert!(Plan::Sampling { breaks: vec![0.0, 0.5], times: 3 }.validate().is_err());
    assert!(Plan::Sampling { breaks: vec![0.5], times: 0 }.validate().is_err());
    assert!(Plan::Influence { cutoff: -1.0 }.validate().is_err());
    assert!(Plan::Tree { times: Some(0) }.validate().is_err());
    assert!(Params::new(Plan::tree()).with_cpus(0).validate().is_err());
}
