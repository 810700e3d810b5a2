use crate::model::fit::FitFailure;
use crate::model::tree::PruneFailure;

#[derive(Debug)]
pub enum SensiError {
    Error(String),
    NoCommonTaxa { n_data: usize, n_tree: usize },
    OrderingMismatch(String),
    NoQualifyingClade { column: String, min_size: usize, largest: usize },
    FullModelFitFailed(FitFailure),
    InvalidPlan(String),
    MissingColumn(String),
    DuplicateTaxon(String),
    Prune(PruneFailure),
    CsvError(csv::Error),
    IoError(std::io::Error),
    RayonError(rayon::ThreadPoolBuildError),
    PhyloDMError(phylodm::error::PhyloErr),
    ParseFloatError(std::num::ParseFloatError),
}

impl std::fmt::Display for SensiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SensiError::Error(e) => write!(f, "{}", e),
            SensiError::NoCommonTaxa { n_data, n_tree } => write!(
                f,
                "No taxa in common between the data ({} rows) and the tree ({} leaves).",
                n_data, n_tree
            ),
            SensiError::OrderingMismatch(taxon) => write!(
                f,
                "Tree leaf '{}' could not be located in the matched data.",
                taxon
            ),
            SensiError::NoQualifyingClade { column, min_size, largest } => write!(
                f,
                "No clade in column '{}' has at least {} taxa (largest has {}).",
                column, min_size, largest
            ),
            SensiError::FullModelFitFailed(e) => write!(f, "The full model could not be fitted: {}", e),
            SensiError::InvalidPlan(e) => write!(f, "Invalid analysis plan: {}", e),
            SensiError::MissingColumn(c) => write!(f, "Column '{}' is not present in the data.", c),
            SensiError::DuplicateTaxon(t) => write!(f, "Duplicate taxon found in the data: {}", t),
            SensiError::Prune(e) => write!(f, "Unable to prune tree: {}", e),
            SensiError::CsvError(e) => write!(f, "CSV error: {}", e),
            SensiError::IoError(e) => write!(f, "IO error: {}", e),
            SensiError::RayonError(e) => write!(f, "Rayon error: {}", e),
            SensiError::PhyloDMError(e) => write!(f, "PhyloDM error: {}", e),
            SensiError::ParseFloatError(e) => write!(f, "Parse float error: {}", e),
        }
    }
}

impl std::error::Error for SensiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SensiError::FullModelFitFailed(e) => Some(e),
            SensiError::Prune(e) => Some(e),
            SensiError::CsvError(e) => Some(e),
            SensiError::IoError(e) => Some(e),
            SensiError::RayonError(e) => Some(e),
            SensiError::PhyloDMError(e) => Some(e),
            SensiError::ParseFloatError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<phylodm::error::PhyloErr> for SensiError {
    fn from(e: phylodm::error::PhyloErr) -> Self {
        SensiError::PhyloDMError(e)
    }
}

pub type SensiResult<T> = Result<T, SensiError>;
