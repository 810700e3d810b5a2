//! Small datasets and trees shared by the unit tests.

use std::collections::BTreeMap;

use phylodm::tree::Taxon;

use crate::model::dataset::{Column, Dataset};
use crate::model::formula::{ModelSpec, Variable};
use crate::model::tree::Tree;

pub fn species(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("sp{}", i)).collect()
}

/// Newick for a balanced tree over the given leaves, every branch of length 1.
pub fn balanced_newick(names: &[String]) -> String {
    fn build(names: &[String]) -> String {
        if names.len() == 1 {
            return format!("{}:1", names[0]);
        }
        let (left, right) = names.split_at(names.len() / 2);
        format!("({},{}):1", build(left), build(right))
    }
    let (left, right) = names.split_at(names.len() / 2);
    format!("({},{});", build(left), build(right))
}

pub fn balanced_tree(names: &[String]) -> Tree {
    Tree::from_newick(&balanced_newick(names)).unwrap()
}

/// `y = 1 + 2x + e` with small deterministic noise, in the given row order.
pub fn linear_dataset(names: &[String]) -> Dataset {
    let mut x = Vec::with_capacity(names.len());
    let mut y = Vec::with_capacity(names.len());
    for i in 0..names.len() {
        let xi = i as f64 * 0.5;
        let noise = ((i * 7) % 5) as f64 * 0.1 - 0.2;
        x.push(Some(xi));
        y.push(Some(1.0 + 2.0 * xi + noise));
    }
    let mut columns = BTreeMap::new();
    columns.insert("x".to_string(), Column::Continuous(x));
    columns.insert("y".to_string(), Column::Continuous(y));
    Dataset::new(names.iter().map(|n| Taxon(n.clone())).collect(), columns).unwrap()
}

pub fn linear_spec() -> ModelSpec {
    ModelSpec::new(Variable::new("y"), vec![Variable::new("x")])
}

pub fn taxon(name: &str) -> Taxon {
    Taxon(name.to_string())
}
