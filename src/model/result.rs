use serde::Serialize;

use crate::model::fit::ModelFit;
use crate::model::job::VariantId;
use crate::model::params::Params;

/// Change in one coefficient relative to the full model. `percent` is `None` when the
/// full-model estimate is exactly zero.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Deviation {
    pub term: String,
    pub absolute: f64,
    pub percent: Option<f64>,
}

/// The model fitted on the matched, unperturbed data.
#[derive(Clone, Debug, Serialize)]
pub struct FullModelEstimate {
    pub n_taxa: usize,
    pub fit: ModelFit,
}

#[derive(Clone, Debug, Serialize)]
pub struct IterationResult {
    pub id: VariantId,
    pub n_taxa: usize,
    pub fit: ModelFit,
    pub deviations: Vec<Deviation>,
}

impl IterationResult {
    pub fn deviation(&self, term: &str) -> Option<&Deviation> {
        self.deviations.iter().find(|d| d.term == term)
    }

    pub fn p_value(&self, term: &str) -> Option<f64> {
        self.fit.coefficients.iter().find(|c| c.term == term).map(|c| c.p_value)
    }
}

/// A refit after removing a random set of taxa the same size as a clade.
#[derive(Clone, Debug, Serialize)]
pub struct NullSample {
    pub clade: String,
    pub size: usize,
    #[serde(flatten)]
    pub result: IterationResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailedVariant {
    pub id: VariantId,
    pub reason: String,
}

/// What the data/tree reconciliation removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MatchReport {
    /// Rows with a missing value in a model column, also pruned from the tree.
    pub dropped_missing: Vec<String>,
    pub dropped_from_data: Vec<String>,
    /// Tree leaves with no row in the data.
    pub dropped_from_tree: Vec<String>,
    pub n_matched: usize,
}

/// Taxa or clades ordered by decreasing absolute standardised deviation.
#[derive(Clone, Debug, Serialize)]
pub struct TermRanking {
    pub term: String,
    pub ranked: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InfluenceRecord {
    pub taxon: String,
    pub term: String,
    pub deviation: f64,
    pub standardized: f64,
    pub influential: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct InfluenceSummary {
    pub cutoff: f64,
    pub records: Vec<InfluenceRecord>,
    pub influential: Vec<TermRanking>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BreakTermStats {
    pub term: String,
    pub mean_deviation: f64,
    pub mean_percent: Option<f64>,
    pub percent_significant: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BreakSummary {
    pub fraction: f64,
    pub n_removed: usize,
    pub n_succeeded: usize,
    pub n_failed: usize,
    pub terms: Vec<BreakTermStats>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SamplingSummary {
    pub breaks: Vec<BreakSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CladeTermTest {
    pub term: String,
    pub deviation: f64,
    pub percent: Option<f64>,
    pub null_mean: f64,
    pub null_sd: f64,
    pub standardized: Option<f64>,
    pub p_value: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CladeTest {
    pub clade: String,
    pub size: usize,
    pub n_null: usize,
    pub terms: Vec<CladeTermTest>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CladeSummary {
    pub min_size: usize,
    pub clades: Vec<CladeTest>,
    pub ranking: Vec<TermRanking>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TermDistribution {
    pub term: String,
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub max: f64,
    pub lower: f64,
    pub upper: f64,
    pub percent_significant: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct EstimateSummary {
    pub terms: Vec<TermDistribution>,
    pub mean_aic: f64,
    pub mean_phylo_param: f64,
}

/// The analysis that produced a report, with its mode-specific summary.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "analysis", content = "summary", rename_all = "snake_case")]
pub enum AnalysisSummary {
    Influence(InfluenceSummary),
    Sampling(SamplingSummary),
    Clade(CladeSummary),
    Tree(EstimateSummary),
    Intraspecific(EstimateSummary),
}

#[derive(Clone, Debug, Serialize)]
pub struct InputFile {
    pub path: String,
    pub md5: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub params: Params,
    pub matching: MatchReport,
    pub baseline: FullModelEstimate,
    pub results: Vec<IterationResult>,
    pub null_samples: Vec<NullSample>,
    pub failures: Vec<FailedVariant>,
    pub n_succeeded: usize,
    pub n_failed: usize,
    #[serde(flatten)]
    pub summary: AnalysisSummary,
    pub inputs: Vec<InputFile>,
}

impl AnalysisReport {
    /// True when every variant was refitted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
