use std::collections::{HashMap, HashSet};
use std::path::Path;

use ndarray::Array2;
use phylodm::tree::{Edge, NodeId, Taxon};
use phylodm::PDM;

use crate::model::error::{SensiError, SensiResult};

/// Reasons a tree could not be pruned to a requested leaf set.
#[derive(Debug, Clone, PartialEq)]
pub enum PruneFailure {
    AbsentTaxon(String),
    TooFewLeaves { remaining: usize },
}

impl std::fmt::Display for PruneFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PruneFailure::AbsentTaxon(t) => write!(f, "taxon '{}' is not a leaf of the tree", t),
            PruneFailure::TooFewLeaves { remaining } => {
                write!(f, "pruning would leave {} leaves, at least 2 are required", remaining)
            }
        }
    }
}

impl std::error::Error for PruneFailure {}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    length: f64,
    taxon: Option<Taxon>,
}

/// A rooted tree with branch lengths, stored as an arena of nodes.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    /// Build a tree from named leaves and (parent, child, length) edges. Node ids are
    /// arbitrary, unnamed nodes are created the first time an edge references them.
    pub fn from_edges(taxa: Vec<(String, usize)>, edges: Vec<(usize, usize, f64)>) -> SensiResult<Self> {
        let mut nodes: Vec<Node> = Vec::with_capacity(taxa.len() + edges.len());
        let mut old_id_to_new_id: HashMap<usize, usize> = HashMap::with_capacity(edges.len() + 1);

        for (taxon, id) in taxa {
            if old_id_to_new_id.contains_key(&id) {
                return Err(SensiError::Error(format!("Node id {} is named twice.", id)));
            }
            old_id_to_new_id.insert(id, nodes.len());
            nodes.push(Node { parent: None, children: Vec::new(), length: 0.0, taxon: Some(Taxon(taxon)) });
        }

        for (parent_id, child_id, length) in edges {
            let parent = *old_id_to_new_id.entry(parent_id).or_insert_with(|| {
                nodes.push(Node { parent: None, children: Vec::new(), length: 0.0, taxon: None });
                nodes.len() - 1
            });
            let child = *old_id_to_new_id.entry(child_id).or_insert_with(|| {
                nodes.push(Node { parent: None, children: Vec::new(), length: 0.0, taxon: None });
                nodes.len() - 1
            });
            if nodes[child].parent.is_some() {
                return Err(SensiError::Error(format!("Node {} has more than one parent.", child_id)));
            }
            nodes[child].parent = Some(parent);
            nodes[child].length = length;
            nodes[parent].children.push(child);
        }

        let roots: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].parent.is_none()).collect();
        if roots.len() != 1 {
            return Err(SensiError::Error(format!("Expected a single root, found {}.", roots.len())));
        }
        Ok(Tree { nodes, root: roots[0] })
    }

    /// Parse a single Newick tree, e.g. `((A:1,B:1):0.5,C:1.5);`.
    pub fn from_newick(text: &str) -> SensiResult<Self> {
        let mut parser = NewickParser { bytes: text.trim().as_bytes(), pos: 0, nodes: Vec::new() };
        let root = parser.parse_subtree(None)?;
        parser.skip_whitespace();
        if parser.peek() == Some(b';') {
            parser.pos += 1;
        }
        parser.skip_whitespace();
        if parser.pos != parser.bytes.len() {
            return Err(SensiError::Error(format!("Unexpected trailing Newick content at byte {}.", parser.pos)));
        }
        Ok(Tree { nodes: parser.nodes, root })
    }

    /// Read every Newick tree in a file, one per `;`.
    pub fn read_newick_path(path: &Path) -> SensiResult<Vec<Self>> {
        let text = std::fs::read_to_string(path).map_err(SensiError::IoError)?;
        text.split_inclusive(';')
            .filter(|chunk| !chunk.trim().is_empty())
            .map(Tree::from_newick)
            .collect()
    }

    /// Leaf taxa in depth-first order.
    pub fn leaves(&self) -> Vec<&Taxon> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.children.is_empty() {
                if let Some(taxon) = &node.taxon {
                    out.push(taxon);
                }
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.is_empty() && n.taxon.is_some()).count()
    }

    pub fn total_length(&self) -> f64 {
        self.nodes.iter().enumerate().filter(|(i, _)| *i != self.root).map(|(_, n)| n.length).sum()
    }

    /// Remove the named leaves. Internal nodes left without descendants are removed and
    /// nodes left with a single child are collapsed into that child's branch.
    pub fn prune(&self, taxa: &[Taxon]) -> Result<Tree, PruneFailure> {
        let leaves: HashSet<&Taxon> = self.leaves().into_iter().collect();
        let mut to_drop: HashSet<&Taxon> = HashSet::with_capacity(taxa.len());
        for taxon in taxa {
            if !leaves.contains(taxon) {
                return Err(PruneFailure::AbsentTaxon(taxon.0.clone()));
            }
            to_drop.insert(taxon);
        }
        let remaining = leaves.len() - to_drop.len();
        if remaining < 2 {
            return Err(PruneFailure::TooFewLeaves { remaining });
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        let root = self
            .copy_kept(self.root, &to_drop, &mut nodes)
            .ok_or(PruneFailure::TooFewLeaves { remaining: 0 })?;
        nodes[root].parent = None;
        nodes[root].length = 0.0;
        Ok(Tree { nodes, root })
    }

    fn copy_kept(&self, id: usize, to_drop: &HashSet<&Taxon>, out: &mut Vec<Node>) -> Option<usize> {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            let taxon = node.taxon.as_ref()?;
            if to_drop.contains(taxon) {
                return None;
            }
            out.push(Node { parent: None, children: Vec::new(), length: node.length, taxon: Some(taxon.clone()) });
            return Some(out.len() - 1);
        }

        let kept: Vec<usize> = node.children.iter().filter_map(|&c| self.copy_kept(c, to_drop, out)).collect();
        match kept.len() {
            0 => None,
            1 => {
                out[kept[0]].length += node.length;
                Some(kept[0])
            }
            _ => {
                let new_id = out.len();
                for &child in &kept {
                    out[child].parent = Some(new_id);
                }
                out.push(Node { parent: None, children: kept, length: node.length, taxon: None });
                Some(new_id)
            }
        }
    }

    /// Distance from the root to every node, indexed by arena position.
    fn depths(&self) -> Vec<f64> {
        let mut depth = vec![0.0; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            for &child in &self.nodes[id].children {
                depth[child] = depth[id] + self.nodes[child].length;
                stack.push(child);
            }
        }
        depth
    }

    fn to_pdm(&self) -> SensiResult<PDM> {
        let mut pdm = PDM::default();
        let mut ids: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            ids.push(pdm.add_node(node.taxon.as_ref())?);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                pdm.add_edge(ids[parent], ids[i], Edge(node.length));
            }
        }
        Ok(pdm)
    }

    /// Pairwise patristic distances between leaves, in the order of the returned taxa.
    pub fn patristic_matrix(&self) -> SensiResult<(Vec<Taxon>, Array2<f64>)> {
        let mut pdm = self.to_pdm()?;
        let (taxa, dm) = pdm.matrix(false)?;
        let n = taxa.len();
        let mut out = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                out[[i, j]] = dm[[i, j]];
            }
        }
        Ok((taxa, out))
    }

    /// Brownian motion covariance between leaves: the shared path length from the root
    /// to the most recent common ancestor of each pair.
    pub fn vcv(&self) -> SensiResult<(Vec<Taxon>, Array2<f64>)> {
        let (taxa, dist) = self.patristic_matrix()?;
        let depths = self.depths();
        let leaf_depth: HashMap<&Taxon, f64> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.taxon.as_ref().map(|t| (t, depths[i])))
            .collect();

        let h: Vec<f64> = taxa
            .iter()
            .map(|t| {
                leaf_depth
                    .get(t)
                    .copied()
                    .ok_or_else(|| SensiError::OrderingMismatch(t.0.clone()))
            })
            .collect::<SensiResult<_>>()?;

        let n = taxa.len();
        let mut cov = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                cov[[i, j]] = if i == j { h[i] } else { (h[i] + h[j] - dist[[i, j]]) / 2.0 };
            }
        }
        Ok((taxa, cov))
    }
}

struct NewickParser<'a> {
    bytes: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl NewickParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_subtree(&mut self, parent: Option<usize>) -> SensiResult<usize> {
        let id = self.nodes.len();
        self.nodes.push(Node { parent, children: Vec::new(), length: 0.0, taxon: None });

        self.skip_whitespace();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.parse_subtree(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(SensiError::Error(format!("Malformed Newick at byte {}.", self.pos))),
                }
            }
        }

        let label = self.read_token();
        if self.nodes[id].children.is_empty() {
            if label.is_empty() {
                return Err(SensiError::Error(format!("Unnamed leaf in Newick at byte {}.", self.pos)));
            }
            self.nodes[id].taxon = Some(Taxon(label));
        }

        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            let length = self.read_token();
            self.nodes[id].length = length.parse().map_err(SensiError::ParseFloatError)?;
        }
        Ok(id)
    }

    fn read_token(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b',' | b'(' | b')' | b':' | b';') || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }
}

/// A single tree or an ordered ensemble of alternative trees.
#[derive(Debug, Clone)]
pub enum Phylogeny {
    Single(Tree),
    Ensemble(Vec<Tree>),
}

impl Phylogeny {
    pub fn trees(&self) -> &[Tree] {
        match self {
            Phylogeny::Single(tree) => std::slice::from_ref(tree),
            Phylogeny::Ensemble(trees) => trees,
        }
    }

    pub fn is_ensemble(&self) -> bool {
        matches!(self, Phylogeny::Ensemble(_))
    }
}

#[test]
fn test_newick_leaf_order() {
    let tree = Tree::from_newick("((A:1,B:1):0.5,(C:0.5,D:0.5):1);").unwrap();
    let leaves: Vec<&str> = tree.leaves().iter().map(|t| t.0.as_str()).collect();
    assert_eq!(leaves, vec!["A", "B", "C", "D"]);
    assert_eq!(tree.n_leaves(), 4);
    assert_eq!(tree.total_length(), 4.5);
}

#[test]
fn test_from_edges_matches_newick() {
    let tree = Tree::from_edges(
        vec![("A".to_string(), 1), ("B".to_string(), 2), ("C".to_string(), 3)],
        vec![(0, 4, 1.0), (4, 1, 1.0), (4, 2, 1.0), (0, 3, 2.0)],
    )
    .unwrap();
    let leaves: Vec<&str> = tree.leaves().iter().map(|t| t.0.as_str()).collect();
    assert_eq!(leaves, vec!["A", "B", "C"]);
}

#[test]
fn test_prune_collapses_unary_nodes() {
    let tree = Tree::from_newick("((A:1,B:1):0.5,(C:0.5,D:0.5):1);").unwrap();
    let pruned = tree.prune(&[Taxon("B".to_string()), Taxon("D".to_string())]).unwrap();
    let leaves: Vec<&str> = pruned.leaves().iter().map(|t| t.0.as_str()).collect();
    assert_eq!(leaves, vec!["A", "C"]);
    // A keeps 1 + 0.5, C keeps 0.5 + 1
    assert_eq!(pruned.total_length(), 3.0);
}

#[test]
fn test_prune_failures() {
    let tree = Tree::from_newick("(A:1,B:1,C:1);").unwrap();
    assert_eq!(
        tree.prune(&[Taxon("Z".to_string())]).unwrap_err(),
        PruneFailure::AbsentTaxon("Z".to_string())
    );
    assert_eq!(
        tree.prune(&[Taxon("A".to_string()), Taxon("B".to_string())]).unwrap_err(),
        PruneFailure::TooFewLeaves { remaining: 1 }
    );
}

#[test]
fn test_vcv_is_shared_path_length() {
    let tree = Tree::from_newick("((A:1,B:1):0.5,C:1.5);").unwrap();
    let (taxa, cov) = tree.vcv().unwrap();
    let idx = |name: &str| taxa.iter().position(|t| t.0 == name).unwrap();
    let (a, b, c) = (idx("A"), idx("B"), idx("C"));
    assert!((cov[[a, a]] - 1.5).abs() < 1e-12);
    assert!((cov[[a, b]] - 0.5).abs() < 1e-12);
    assert!(cov[[a, c]].abs() < 1e-12);
    assert!((cov[[c, c]] - 1.5).abs() < 1e-12);
}
