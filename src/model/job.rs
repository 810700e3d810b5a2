use phylodm::tree::Taxon;
use serde::Serialize;

use crate::model::dataset::Dataset;

/// Stable identity of a perturbed variant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantId {
    Species { taxon: String },
    Sample { fraction: f64, repetition: usize },
    Clade { clade: String },
    Null { clade: String, size: usize, draw: usize },
    Tree { tree: usize, repetition: usize },
    Resample { repetition: usize },
}

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VariantId::Species { taxon } => write!(f, "species {}", taxon),
            VariantId::Sample { fraction, repetition } => write!(f, "sample {} #{}", fraction, repetition),
            VariantId::Clade { clade } => write!(f, "clade {}", clade),
            VariantId::Null { clade, size, draw } => write!(f, "null {} (n={}) #{}", clade, size, draw),
            VariantId::Tree { tree, repetition } => write!(f, "tree {} #{}", tree, repetition),
            VariantId::Resample { repetition } => write!(f, "resample #{}", repetition),
        }
    }
}

/// What differs from the matched data and tree.
#[derive(Debug, Clone)]
pub enum Change {
    Remove(Vec<Taxon>),
    Tree(usize),
    Values(Dataset),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: VariantId,
    pub change: Change,
}

impl Job {
    pub fn new(id: VariantId, change: Change) -> Self {
        Job { id, change }
    }

    pub fn removed(&self) -> &[Taxon] {
        match &self.change {
            Change::Remove(taxa) => taxa,
            _ => &[],
        }
    }
}
