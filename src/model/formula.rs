use clap::ValueEnum;
use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::model::dataset::Dataset;
use crate::model::error::{SensiError, SensiResult};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Use values as observed
    Identity,
    /// Natural logarithm
    Log,
    /// Base 10 logarithm
    Log10,
    /// Square root
    Sqrt,
}

impl Transform {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Transform::Identity => x,
            Transform::Log => x.ln(),
            Transform::Log10 => x.log10(),
            Transform::Sqrt => x.sqrt(),
        }
    }
}

/// A model variable: the column it reads, an optional column holding its
/// standard deviation, and the transform applied before fitting.
#[derive(Clone, Debug, Serialize)]
pub struct Variable {
    pub column: String,
    pub uncertainty: Option<String>,
    pub transform: Transform,
}

impl Variable {
    pub fn new(column: &str) -> Self {
        Variable { column: column.to_string(), uncertainty: None, transform: Transform::Identity }
    }

    pub fn with_uncertainty(mut self, column: &str) -> Self {
        self.uncertainty = Some(column.to_string());
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Response ~ predictors.
#[derive(Clone, Debug, Serialize)]
pub struct ModelSpec {
    pub response: Variable,
    pub predictors: Vec<Variable>,
}

impl ModelSpec {
    pub fn new(response: Variable, predictors: Vec<Variable>) -> Self {
        ModelSpec { response, predictors }
    }

    /// Columns whose missing values exclude a row from the analysis.
    pub fn columns(&self) -> Vec<&str> {
        std::iter::once(&self.response)
            .chain(self.predictors.iter())
            .map(|v| v.column.as_str())
            .collect()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        std::iter::once(&self.response).chain(self.predictors.iter())
    }

    /// Names of the fitted coefficients, intercept first.
    pub fn terms(&self) -> Vec<String> {
        std::iter::once(INTERCEPT.to_string())
            .chain(self.predictors.iter().map(|p| p.column.clone()))
            .collect()
    }
}

pub const INTERCEPT: &str = "(Intercept)";

/// Response vector and design matrix (with intercept column) built from a dataset.
pub struct ModelFrame {
    pub y: Array1<f64>,
    pub x: Array2<f64>,
}

impl ModelFrame {
    pub fn build(spec: &ModelSpec, data: &Dataset) -> SensiResult<Self> {
        let n = data.len();
        let p = spec.predictors.len() + 1;

        let response = data.continuous(&spec.response.column)?;
        let mut y = Array1::zeros(n);
        for (i, value) in response.iter().enumerate() {
            y[i] = transformed(value, &spec.response, &data.taxa[i].0)?;
        }

        let mut x = Array2::ones((n, p));
        for (j, predictor) in spec.predictors.iter().enumerate() {
            let values = data.continuous(&predictor.column)?;
            for (i, value) in values.iter().enumerate() {
                x[[i, j + 1]] = transformed(value, predictor, &data.taxa[i].0)?;
            }
        }
        Ok(ModelFrame { y, x })
    }
}

fn transformed(value: &Option<f64>, variable: &Variable, taxon: &str) -> SensiResult<f64> {
    let raw = value.ok_or_else(|| {
        SensiError::Error(format!("Missing value for '{}' in taxon '{}'.", variable.column, taxon))
    })?;
    let out = variable.transform.apply(raw);
    if !out.is_finite() {
        return Err(SensiError::Error(format!(
            "Transformed value of '{}' for taxon '{}' is not finite ({}).",
            variable.column, taxon, raw
        )));
    }
    Ok(out)
}

#[test]
fn test_model_frame_applies_transforms() {
    use crate::model::dataset::dataset_from_rows;

    let data = dataset_from_rows(
        &["y", "x"],
        &[("A", vec![Some(1.0), Some(10.0)]), ("B", vec![Some(2.0), Some(100.0)])],
    );
    let spec = ModelSpec::new(Variable::new("y"), vec![Variable::new("x").with_transform(Transform::Log10)]);
    let frame = ModelFrame::build(&spec, &data).unwrap();
    assert_eq!(frame.y.to_vec(), vec![1.0, 2.0]);
    assert_eq!(frame.x.column(0).to_vec(), vec![1.0, 1.0]);
    assert_eq!(frame.x.column(1).to_vec(), vec![1.0, 2.0]);
    assert_eq!(spec.terms(), vec!["(Intercept)".to_string(), "x".to_string()]);
}

#[test]
fn test_model_frame_rejects_log_of_negative() {
    use crate::model::dataset::dataset_from_rows;

    let data = dataset_from_rows(&["y"], &[("A", vec![Some(-1.0)]), ("B", vec![Some(2.0)])]);
    let spec = ModelSpec::new(Variable::new("y").with_transform(Transform::Log), vec![]);
    assert!(ModelFrame::build(&spec, &data).is_err());
}
