use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::model::dataset::Dataset;
use crate::model::fit::{Coefficient, EvolutionModel, FitFailure, ModelFit, ModelOptions, PhyloFitter};
use crate::model::formula::{ModelFrame, ModelSpec};
use crate::model::tree::Tree;
use crate::ndarray::validation::contains_nan;

const GOLDEN: f64 = 0.618_033_988_749_894_8;
const LAMBDA_TOL: f64 = 1e-6;
const LAMBDA_MAX_ITER: usize = 100;

pub struct GlsEstimate {
    pub beta: Array1<f64>,
    pub std_error: Array1<f64>,
    pub log_lik: f64,
    pub df: usize,
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Generalised least squares of `y` on `x` with error covariance `cov`, using
/// maximum likelihood for the residual variance.
pub fn gls(y: &Array1<f64>, x: &Array2<f64>, cov: &Array2<f64>) -> Result<GlsEstimate, FitFailure> {
    let (n, p) = x.dim();
    if n <= p {
        return Err(FitFailure::InsufficientData { n, p });
    }

    let x = to_dmatrix(x);
    let y = DVector::from_iterator(n, y.iter().copied());
    let v_chol = to_dmatrix(cov)
        .cholesky()
        .ok_or_else(|| FitFailure::Numerical("covariance is not positive definite".to_string()))?;

    // beta = (X'V^-1 X)^-1 X'V^-1 y
    let v_inv_x = v_chol.solve(&x);
    let v_inv_y = v_chol.solve(&y);
    let xtvinvx_inv = (x.transpose() * &v_inv_x)
        .try_inverse()
        .ok_or_else(|| FitFailure::Numerical("design matrix is singular".to_string()))?;
    let beta = &xtvinvx_inv * (x.transpose() * &v_inv_y);

    let residuals = &y - &x * &beta;
    let rss = residuals.dot(&v_chol.solve(&residuals));
    if !rss.is_finite() || rss <= 0.0 {
        return Err(FitFailure::Numerical(format!("residual sum of squares is {}", rss)));
    }

    let nf = n as f64;
    let sigma2_ml = rss / nf;
    let log_det_v = 2.0 * v_chol.l().diagonal().map(|d| d.ln()).sum();
    let log_lik = -0.5 * (nf * ((2.0 * std::f64::consts::PI).ln() + sigma2_ml.ln() + 1.0) + log_det_v);

    let df = n - p;
    let sigma2 = rss / df as f64;
    let std_error = xtvinvx_inv.diagonal().map(|v| (v * sigma2).sqrt());

    if beta.iter().chain(std_error.iter()).any(|v| !v.is_finite()) || !log_lik.is_finite() {
        return Err(FitFailure::Numerical("non-finite estimate".to_string()));
    }
    Ok(GlsEstimate {
        beta: beta.iter().copied().collect(),
        std_error: std_error.iter().copied().collect(),
        log_lik,
        df,
    })
}

/// Multiply the off-diagonal (shared history) entries by lambda.
pub fn pagel_scale(cov: &Array2<f64>, lambda: f64) -> Array2<f64> {
    let mut out = cov * lambda;
    for i in 0..cov.nrows() {
        out[[i, i]] = cov[[i, i]];
    }
    out
}

/// Golden-section search for the lambda that maximises the likelihood.
fn optimise_lambda(y: &Array1<f64>, x: &Array2<f64>, cov: &Array2<f64>) -> Result<(f64, GlsEstimate), FitFailure> {
    let neg_log_lik = |lambda: f64| -> f64 {
        gls(y, x, &pagel_scale(cov, lambda)).map(|e| -e.log_lik).unwrap_or(f64::INFINITY)
    };

    let (mut a, mut b) = (0.0_f64, 1.0_f64);
    let mut c = b - GOLDEN * (b - a);
    let mut d = a + GOLDEN * (b - a);
    let (mut fc, mut fd) = (neg_log_lik(c), neg_log_lik(d));
    let mut iter = 0;
    while (b - a) > LAMBDA_TOL && iter < LAMBDA_MAX_ITER {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - GOLDEN * (b - a);
            fc = neg_log_lik(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + GOLDEN * (b - a);
            fd = neg_log_lik(d);
        }
        iter += 1;
    }

    // The optimum may sit on a boundary
    let candidates = [(a + b) / 2.0, 0.0, 1.0];
    let best = candidates
        .iter()
        .map(|&lambda| (lambda, neg_log_lik(lambda)))
        .filter(|(_, f)| f.is_finite())
        .min_by(|l, r| l.1.partial_cmp(&r.1).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| FitFailure::NonConvergence("no lambda in [0, 1] gives a finite likelihood".to_string()))?;

    let estimate = gls(y, x, &pagel_scale(cov, best.0))?;
    Ok((best.0, estimate))
}

/// Phylogenetic generalised least squares under Brownian motion or Pagel's lambda.
#[derive(Default)]
pub struct PhyloGls;

impl PhyloFitter for PhyloGls {
    fn fit(&self, spec: &ModelSpec, data: &Dataset, tree: &Tree, options: &ModelOptions) -> Result<ModelFit, FitFailure> {
        let frame = ModelFrame::build(spec, data).map_err(|e| FitFailure::Numerical(e.to_string()))?;
        let (n, p) = frame.x.dim();
        if n <= p {
            return Err(FitFailure::InsufficientData { n, p });
        }

        // Align the tree covariance with the data rows
        let (tree_taxa, tree_cov) = tree.vcv().map_err(|e| FitFailure::Numerical(e.to_string()))?;
        let tree_idx: HashMap<_, _> = tree_taxa.iter().enumerate().map(|(i, t)| (t, i)).collect();
        let pos: Vec<usize> = data
            .taxa
            .iter()
            .map(|t| {
                tree_idx
                    .get(t)
                    .copied()
                    .ok_or_else(|| FitFailure::Numerical(format!("taxon '{}' is not in the tree", t.0)))
            })
            .collect::<Result<_, _>>()?;
        let cov = Array2::from_shape_fn((n, n), |(i, j)| tree_cov[[pos[i], pos[j]]]);
        if contains_nan(&cov) || contains_nan(&frame.x) {
            return Err(FitFailure::Numerical("NaN in covariance or design matrix".to_string()));
        }

        let (lambda, estimate, n_params) = match options.model {
            EvolutionModel::BrownianMotion => (1.0, gls(&frame.y, &frame.x, &cov)?, p + 1),
            EvolutionModel::Lambda => {
                let (lambda, estimate) = optimise_lambda(&frame.y, &frame.x, &cov)?;
                (lambda, estimate, p + 2)
            }
        };

        let t_dist = StudentsT::new(0.0, 1.0, estimate.df as f64).map_err(|e| FitFailure::Numerical(e.to_string()))?;
        let coefficients = spec
            .terms()
            .into_iter()
            .enumerate()
            .map(|(j, term)| {
                let t = estimate.beta[j] / estimate.std_error[j];
                let p_value = if t.is_finite() { 2.0 * (1.0 - t_dist.cdf(t.abs())) } else { 0.0 };
                Coefficient { term, estimate: estimate.beta[j], p_value }
            })
            .collect();

        Ok(ModelFit {
            coefficients,
            aic: -2.0 * estimate.log_lik + 2.0 * n_params as f64,
            phylo_param: lambda,
        })
    }
}

#[test]
fn test_gls_star_tree_matches_ols() {
    use crate::model::dataset::dataset_from_rows;
    use crate::model::formula::Variable;

    let data = dataset_from_rows(
        &["y", "x"],
        &[
            ("A", vec![Some(3.1), Some(1.0)]),
            ("B", vec![Some(4.9), Some(2.0)]),
            ("C", vec![Some(7.2), Some(3.0)]),
            ("D", vec![Some(8.8), Some(4.0)]),
            ("E", vec![Some(11.1), Some(5.0)]),
        ],
    );
    let tree = Tree::from_newick("(A:1,B:1,C:1,D:1,E:1);").unwrap();
    let spec = ModelSpec::new(Variable::new("y"), vec![Variable::new("x")]);
    let options = ModelOptions { model: EvolutionModel::BrownianMotion };

    let fit = PhyloGls.fit(&spec, &data, &tree, &options).unwrap();
    assert!((fit.estimate("x").unwrap() - 1.99).abs() < 1e-9);
    assert!((fit.estimate("(Intercept)").unwrap() - 1.05).abs() < 1e-9);
    assert!(fit.coefficients[1].p_value < 0.001);
    assert_eq!(fit.phylo_param, 1.0);
}

#[test]
fn test_gls_lambda_within_bounds() {
    use crate::model::dataset::dataset_from_rows;
    use crate::model::formula::Variable;

    let data = dataset_from_rows(
        &["y", "x"],
        &[
            ("A", vec![Some(1.0), Some(0.5)]),
            ("B", vec![Some(1.4), Some(0.7)]),
            ("C", vec![Some(3.1), Some(2.0)]),
            ("D", vec![Some(2.6), Some(1.8)]),
            ("E", vec![Some(5.2), Some(3.9)]),
            ("F", vec![Some(4.1), Some(3.6)]),
        ],
    );
    let tree = Tree::from_newick("(((A:1,B:1):1,(C:1,D:1):1):1,(E:1.5,F:1.5):1.5);").unwrap();
    let spec = ModelSpec::new(Variable::new("y"), vec![Variable::new("x")]);

    let fit = PhyloGls.fit(&spec, &data, &tree, &ModelOptions::default()).unwrap();
    assert!((0.0..=1.0).contains(&fit.phylo_param));
    assert!(fit.aic.is_finite());
    assert!(fit.estimate("x").unwrap() > 0.0);
}

#[test]
fn test_gls_insufficient_data() {
    use crate::model::dataset::dataset_from_rows;
    use crate::model::formula::Variable;

    let data = dataset_from_rows(&["y", "x"], &[("A", vec![Some(1.0), Some(1.0)]), ("B", vec![Some(2.0), Some(3.0)])]);
    let tree = Tree::from_newick("(A:1,B:1);").unwrap();
    let spec = ModelSpec::new(Variable::new("y"), vec![Variable::new("x")]);
    let result = PhyloGls.fit(&spec, &data, &tree, &ModelOptions::default());
    assert_eq!(result.unwrap_err(), FitFailure::InsufficientData { n: 2, p: 2 });
}

#[test]
fn test_gls_likelihood_invariant_to_covariance_scale() {
    use ndarray::array;

    let y = array![3.1, 4.9, 7.2, 8.8, 11.1];
    let x = Array2::from_shape_fn((5, 2), |(i, j)| if j == 0 { 1.0 } else { (i + 1) as f64 });
    let identity = Array2::eye(5);

    let unit = gls(&y, &x, &identity).unwrap();
    let rss: f64 = 0.107;
    let expected = -2.5 * ((2.0 * std::f64::consts::PI).ln() + (rss / 5.0).ln() + 1.0);
    assert!((unit.log_lik - expected).abs() < 1e-9);
    assert_eq!(unit.df, 3);

    let scaled = gls(&y, &x, &(&identity * 4.0)).unwrap();
    assert!((scaled.log_lik - unit.log_lik).abs() < 1e-9);
    for (a, b) in unit.beta.iter().zip(scaled.beta.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
    for (a, b) in unit.std_error.iter().zip(scaled.std_error.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn test_gls_rejects_indefinite_covariance() {
    use ndarray::array;

    let y = array![1.0, 2.0, 4.0];
    let x = Array2::from_shape_fn((3, 1), |_| 1.0);
    let cov = array![[1.0, 2.0, 0.0], [2.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    assert!(matches!(gls(&y, &x, &cov), Err(FitFailure::Numerical(_))));
}
