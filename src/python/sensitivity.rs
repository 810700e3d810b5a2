use std::collections::HashMap;
use std::path::PathBuf;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::method::sensitivity::Sensitivity;
use crate::model::dataset::Dataset;
use crate::model::error::SensiError;
use crate::model::fit::{EvolutionModel, ModelOptions};
use crate::model::formula::{ModelSpec, Variable};
use crate::model::params::{
    Distribution, Params, Plan, DEFAULT_BREAKS, DEFAULT_CLADE_MIN_SIZE, DEFAULT_CUTOFF, DEFAULT_NULL_TIMES,
    DEFAULT_SAMPLING_TIMES,
};
use crate::model::result::InputFile;
use crate::model::tree::{Phylogeny, Tree};
use crate::stats::gls::PhyloGls;
use crate::util::hash::{describe_input, file_md5};
use crate::util::progress::NoProgress;

fn to_py_err(e: SensiError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

#[pyclass(name = "Sensitivity")]
pub struct PySensitivity {
    pub sensitivity: Sensitivity,
    pub inputs: Vec<InputFile>,
    pub options: ModelOptions,
}

impl PySensitivity {
    fn run_json(&self, plan: Plan, cpus: usize, seed: u64) -> PyResult<String> {
        let params = Params::new(plan).with_cpus(cpus).with_seed(seed).with_options(self.options);
        let mut report = self.sensitivity.run(&params, &PhyloGls, &NoProgress).map_err(to_py_err)?;
        report.inputs = self.inputs.clone();
        report.to_json().map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

#[pymethods]
impl PySensitivity {
    /// Load a delimited data file and a Newick file holding one tree or an ensemble.
    /// `uncertainty` maps a model column to the column holding its standard deviation.
    #[new]
    #[pyo3(signature = (data_path, tree_path, response, predictors, uncertainty=None, delimiter=",", brownian_motion=false))]
    pub fn new(
        data_path: &str,
        tree_path: &str,
        response: &str,
        predictors: Vec<String>,
        uncertainty: Option<HashMap<String, String>>,
        delimiter: &str,
        brownian_motion: bool,
    ) -> PyResult<Self> {
        let delimiter = *delimiter.as_bytes().first().ok_or_else(|| PyValueError::new_err("empty delimiter"))?;
        let data_path = PathBuf::from(data_path);
        let tree_path = PathBuf::from(tree_path);

        let uncertainty = uncertainty.unwrap_or_default();
        let variable = |column: &str| match uncertainty.get(column) {
            Some(sd) => Variable::new(column).with_uncertainty(sd),
            None => Variable::new(column),
        };
        let spec = ModelSpec::new(variable(response), predictors.iter().map(|p| variable(p)).collect());

        let data = Dataset::read(&data_path, delimiter).map_err(to_py_err)?;
        let mut trees = Tree::read_newick_path(&tree_path).map_err(to_py_err)?;
        let phylogeny = match trees.len() {
            0 => return Err(PyValueError::new_err("no trees found")),
            1 => Phylogeny::Single(trees.remove(0)),
            _ => Phylogeny::Ensemble(trees),
        };
        let inputs = vec![
            describe_input(&data_path).map_err(to_py_err)?,
            describe_input(&tree_path).map_err(to_py_err)?,
        ];
        let model = if brownian_motion { EvolutionModel::BrownianMotion } else { EvolutionModel::Lambda };

        Ok(Self { sensitivity: Sensitivity::new(spec, data, phylogeny), inputs, options: ModelOptions { model } })
    }

    #[pyo3(signature = (cutoff=DEFAULT_CUTOFF, cpus=1, seed=42))]
    pub fn influence(&self, cutoff: f64, cpus: usize, seed: u64) -> PyResult<String> {
        self.run_json(Plan::Influence { cutoff }, cpus, seed)
    }

    #[pyo3(signature = (breaks=None, times=DEFAULT_SAMPLING_TIMES, cpus=1, seed=42))]
    pub fn sampling(&self, breaks: Option<Vec<f64>>, times: usize, cpus: usize, seed: u64) -> PyResult<String> {
        let breaks = breaks.unwrap_or_else(|| DEFAULT_BREAKS.to_vec());
        self.run_json(Plan::Sampling { breaks, times }, cpus, seed)
    }

    #[pyo3(signature = (column, min_size=DEFAULT_CLADE_MIN_SIZE, times=DEFAULT_NULL_TIMES, cpus=1, seed=42))]
    pub fn clade(&self, column: String, min_size: usize, times: usize, cpus: usize, seed: u64) -> PyResult<String> {
        self.run_json(Plan::Clade { column, min_size, times }, cpus, seed)
    }

    #[pyo3(signature = (times=None, cpus=1, seed=42))]
    pub fn tree(&self, times: Option<usize>, cpus: usize, seed: u64) -> PyResult<String> {
        self.run_json(Plan::Tree { times }, cpus, seed)
    }

    #[pyo3(signature = (times=DEFAULT_SAMPLING_TIMES, uniform=false, cpus=1, seed=42))]
    pub fn intraspecific(&self, times: usize, uniform: bool, cpus: usize, seed: u64) -> PyResult<String> {
        let distribution = if uniform { Distribution::Uniform } else { Distribution::Normal };
        self.run_json(Plan::Intraspecific { times, distribution }, cpus, seed)
    }
}

#[pyfunction]
#[pyo3(name = "file_md5")]
pub fn file_md5_py(path: String) -> PyResult<String> {
    file_md5(&PathBuf::from(&path))
        .map_err(|e| PyValueError::new_err(format!("Unable to calculate MD5 {e}: {}", &path)))
}
