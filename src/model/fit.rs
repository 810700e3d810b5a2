use clap::ValueEnum;
use serde::Serialize;

use crate::model::dataset::Dataset;
use crate::model::formula::ModelSpec;
use crate::model::tree::Tree;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionModel {
    /// Brownian motion, lambda fixed at 1
    BrownianMotion,
    /// Pagel's lambda, estimated in [0, 1]
    Lambda,
}

/// Options handed through to the fit capability untouched.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct ModelOptions {
    pub model: EvolutionModel,
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions { model: EvolutionModel::Lambda }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    pub p_value: f64,
}

/// The outcome of a successful fit.
#[derive(Clone, Debug, Serialize)]
pub struct ModelFit {
    pub coefficients: Vec<Coefficient>,
    pub aic: f64,
    pub phylo_param: f64,
}

impl ModelFit {
    pub fn estimate(&self, term: &str) -> Option<f64> {
        self.coefficients.iter().find(|c| c.term == term).map(|c| c.estimate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FitFailure {
    NonConvergence(String),
    Numerical(String),
    InsufficientData { n: usize, p: usize },
    Prune(String),
}

impl std::fmt::Display for FitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FitFailure::NonConvergence(e) => write!(f, "did not converge: {}", e),
            FitFailure::Numerical(e) => write!(f, "numerical error: {}", e),
            FitFailure::InsufficientData { n, p } => {
                write!(f, "{} observations are not enough for {} coefficients", n, p)
            }
            FitFailure::Prune(e) => write!(f, "prune failed: {}", e),
        }
    }
}

impl std::error::Error for FitFailure {}

/// A phylogenetic regression. The data rows and tree leaves passed in always
/// describe the same taxa.
pub trait PhyloFitter: Sync {
    fn fit(&self, spec: &ModelSpec, data: &Dataset, tree: &Tree, options: &ModelOptions) -> Result<ModelFit, FitFailure>;
}
