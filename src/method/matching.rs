use std::collections::HashSet;

use bitvec::prelude::*;
use log::{info, warn};
use phylodm::tree::Taxon;

use crate::model::dataset::Dataset;
use crate::model::error::{SensiError, SensiResult};
use crate::model::formula::ModelSpec;
use crate::model::result::MatchReport;
use crate::model::tree::{Phylogeny, Tree};
use crate::util::bitvec::mask_a_and_not_b;

/// A dataset and phylogeny describing exactly the same taxa, rows in leaf order.
#[derive(Debug, Clone)]
pub struct Matched {
    pub data: Dataset,
    pub phylogeny: Phylogeny,
    pub report: MatchReport,
}

impl Matched {
    /// The tree every non-ensemble analysis refits against.
    pub fn tree(&self) -> &Tree {
        &self.phylogeny.trees()[0]
    }
}

/// Reconcile the data and the tree(s). Rows missing a value in a model column are
/// dropped, then both sides are cut down to the taxa they share. Rows are taken from
/// the original data, so columns outside the model keep their missing values.
pub fn match_data_tree(spec: &ModelSpec, data: &Dataset, phylogeny: &Phylogeny) -> SensiResult<Matched> {
    let trees = phylogeny.trees();
    if trees.is_empty() {
        return Err(SensiError::Error("At least one tree is required.".to_string()));
    }

    // Rows with a missing value in any model column
    let missing = data.missing_mask(&spec.columns())?;
    let dropped_missing: Vec<String> = missing.iter_ones().map(|i| data.taxa[i].0.clone()).collect();
    if !dropped_missing.is_empty() {
        warn!("Dropped {} rows with missing values in the model columns.", dropped_missing.len());
    }

    // Rows whose taxon is a leaf of every tree
    let leaf_sets: Vec<HashSet<&Taxon>> = trees.iter().map(|t| t.leaves().into_iter().collect()).collect();
    let mut in_trees = bitvec![0; data.len()];
    for (i, taxon) in data.taxa.iter().enumerate() {
        if leaf_sets.iter().all(|leaves| leaves.contains(taxon)) {
            in_trees.set(i, true);
        }
    }
    let keep = mask_a_and_not_b(&in_trees, &missing)?;

    let common: HashSet<&Taxon> = keep.iter_ones().map(|i| &data.taxa[i]).collect();
    if common.is_empty() {
        return Err(SensiError::NoCommonTaxa { n_data: data.len() - missing.count_ones(), n_tree: leaf_sets[0].len() });
    }

    let dropped_from_data: Vec<String> = (0..data.len())
        .filter(|&i| !missing[i] && !keep[i])
        .map(|i| data.taxa[i].0.clone())
        .collect();

    // Incomplete rows are already reported under dropped_missing
    let incomplete: HashSet<&Taxon> = missing.iter_ones().map(|i| &data.taxa[i]).collect();
    let mut dropped_from_tree: Vec<String> = Vec::new();
    let mut seen: HashSet<&Taxon> = HashSet::new();
    let mut pruned: Vec<Tree> = Vec::with_capacity(trees.len());
    for tree in trees {
        let to_drop: Vec<Taxon> = tree.leaves().into_iter().filter(|t| !common.contains(t)).cloned().collect();
        for taxon in tree.leaves() {
            if !common.contains(taxon) && !incomplete.contains(taxon) && seen.insert(taxon) {
                dropped_from_tree.push(taxon.0.clone());
            }
        }
        if to_drop.is_empty() {
            pruned.push(tree.clone());
        } else {
            pruned.push(tree.prune(&to_drop).map_err(SensiError::Prune)?);
        }
    }

    if !dropped_from_data.is_empty() {
        warn!("Dropped {} taxa from the data that are not in the tree: {}", dropped_from_data.len(), dropped_from_data.join(", "));
    }
    if !dropped_from_tree.is_empty() {
        warn!("Dropped {} taxa from the tree that are not in the data: {}", dropped_from_tree.len(), dropped_from_tree.join(", "));
    }

    // Rows follow the leaf order of the first tree
    let matched_data = data.select_taxa(pruned[0].leaves())?;
    let n_matched = matched_data.len();
    info!("Matched {} taxa between the data and {} tree(s).", n_matched, pruned.len());

    let phylogeny = match phylogeny {
        Phylogeny::Single(_) => Phylogeny::Single(pruned.remove(0)),
        Phylogeny::Ensemble(_) => Phylogeny::Ensemble(pruned),
    };
    Ok(Matched {
        data: matched_data,
        phylogeny,
        report: MatchReport { dropped_missing, dropped_from_data, dropped_from_tree, n_matched },
    })
}

#[test]
fn test_matched_rows_follow_leaf_order() {
    use crate::util::fixtures::{linear_dataset, linear_spec, species};

    let names = species(6);
    let mut reversed = names.clone();
    reversed.reverse();
    let data = linear_dataset(&reversed);
    let tree = Tree::from_newick("((sp1:1,sp2:1):1,((sp3:1,sp4:1):1,(sp5:1,sp6:1):1):1);").unwrap();

    let matched = match_data_tree(&linear_spec(), &data, &Phylogeny::Single(tree)).unwrap();
    let leaves: Vec<Taxon> = matched.tree().leaves().into_iter().cloned().collect();
    assert_eq!(matched.data.taxa, leaves);
    assert_eq!(matched.report.n_matched, 6);
    assert!(matched.report.dropped_from_tree.is_empty());
}

#[test]
fn test_match_drops_incomplete_and_unmatched() {
    use crate::model::dataset::{dataset_from_rows, Column};
    use crate::util::fixtures::{linear_spec, taxon};

    let mut data = dataset_from_rows(
        &["y", "x", "extra"],
        &[
            ("A", vec![Some(1.0), Some(1.0), None]),
            ("B", vec![Some(2.0), None, Some(1.0)]),
            ("C", vec![Some(3.0), Some(2.0), Some(2.0)]),
            ("D", vec![Some(4.0), Some(3.0), Some(3.0)]),
            ("Q", vec![Some(5.0), Some(4.0), Some(4.0)]),
        ],
    );
    data.columns.insert(
        "family".to_string(),
        Column::Categorical(vec![None, Some("f".to_string()), Some("f".to_string()), None, None]),
    );
    let tree = Tree::from_newick("((A:1,B:1):1,(C:1,(D:1,Z:1):1):1);").unwrap();

    let matched = match_data_tree(&linear_spec(), &data, &Phylogeny::Single(tree)).unwrap();
    assert_eq!(matched.data.taxa, vec![taxon("A"), taxon("C"), taxon("D")]);
    assert_eq!(matched.report.dropped_missing, vec!["B".to_string()]);
    assert_eq!(matched.report.dropped_from_data, vec!["Q".to_string()]);
    assert_eq!(matched.report.dropped_from_tree, vec!["Z".to_string()]);
    assert!(!matched.tree().leaves().contains(&&taxon("B")));

    // Columns outside the model keep their missing values
    assert_eq!(matched.data.continuous("extra").unwrap(), &[None, Some(2.0), Some(3.0)]);
    assert_eq!(matched.data.categorical("family").unwrap(), &[None, Some("f".to_string()), None]);
}

#[test]
fn test_matching_is_idempotent() {
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};

    let names = species(10);
    let data = linear_dataset(&names[..8]);
    let first = match_data_tree(&linear_spec(), &data, &Phylogeny::Single(balanced_tree(&names))).unwrap();
    let second = match_data_tree(&linear_spec(), &first.data, &first.phylogeny).unwrap();
    assert_eq!(second.report.n_matched, first.report.n_matched);
    assert!(second.report.dropped_missing.is_empty());
    assert!(second.report.dropped_from_data.is_empty());
    assert!(second.report.dropped_from_tree.is_empty());
    assert_eq!(second.data.taxa, first.data.taxa);
}

#[test]
fn test_no_common_taxa() {
    use crate::util::fixtures::{linear_dataset, linear_spec};

    let data = linear_dataset(&["A".to_string(), "B".to_string()]);
    let tree = Tree::from_newick("(C:1,D:1);").unwrap();
    let result = match_data_tree(&linear_spec(), &data, &Phylogeny::Single(tree));
    assert!(matches!(result, Err(SensiError::NoCommonTaxa { n_data: 2, n_tree: 2 })));
}

#[test]
fn test_ensemble_members_share_leaf_set() {
    use crate::util::fixtures::{linear_dataset, linear_spec, species};

    let names = species(5);
    let data = linear_dataset(&names);
    let trees = vec![
        Tree::from_newick("((sp1:1,sp2:1):1,(sp3:1,(sp4:1,sp5:1):1):1);").unwrap(),
        Tree::from_newick("((sp5:1,sp1:1):1,((sp3:1,sp6:1):1,(sp4:1,sp2:1):1):1);").unwrap(),
    ];
    let matched = match_data_tree(&linear_spec(), &data, &Phylogeny::Ensemble(trees)).unwrap();
    let expected: HashSet<&Taxon> = matched.data.taxa.iter().collect();
    for tree in matched.phylogeny.trees() {
        let leaves: HashSet<&Taxon> = tree.leaves().into_iter().collect();
        assert_eq!(leaves, expected);
    }
    assert_eq!(matched.report.dropped_from_tree, vec!["sp6".to_string()]);
}
