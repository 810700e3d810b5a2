use crate::model::fit::ModelFit;
use crate::model::result::Deviation;
use crate::stats::vec::calc_sample_stddev;

/// Difference of every baseline coefficient against the refit, `estimate - baseline`,
/// and the same difference as a percentage of the baseline magnitude.
pub fn calc_deviations(baseline: &ModelFit, fit: &ModelFit) -> Vec<Deviation> {
    baseline
        .coefficients
        .iter()
        .map(|base| {
            let estimate = fit.estimate(&base.term).unwrap_or(f64::NAN);
            let absolute = estimate - base.estimate;
            Deviation { term: base.term.clone(), absolute, percent: calc_percent_deviation(absolute, base.estimate) }
        })
        .collect()
}

/// `100 * |deviation| / |baseline|`, undefined when the baseline is exactly zero.
pub fn calc_percent_deviation(deviation: f64, baseline: f64) -> Option<f64> {
    if baseline == 0.0 {
        None
    } else {
        Some(100.0 * deviation.abs() / baseline.abs())
    }
}

/// Deviations divided by their sample standard deviation.
pub fn calc_standardized(x: &[f64]) -> Vec<f64> {
    let sd = calc_sample_stddev(x);
    x.iter().map(|&x_i| x_i / sd).collect()
}

/// Share of null deviations at least as large in magnitude as the observed one.
/// `None` without null deviations.
pub fn calc_randomization_p_value(observed: f64, null: &[f64]) -> Option<f64> {
    if null.is_empty() {
        return None;
    }
    let n_extreme = null.iter().filter(|d| d.abs() >= observed.abs()).count();
    Some(n_extreme as f64 / null.len() as f64)
}

#[test]
fn test_identical_fit_has_zero_deviation() {
    use crate::model::fit::Coefficient;

    let fit = ModelFit {
        coefficients: vec![
            Coefficient { term: "(Intercept)".to_string(), estimate: 0.4, p_value: 0.2 },
            Coefficient { term: "x".to_string(), estimate: -1.3, p_value: 0.01 },
        ],
        aic: 10.0,
        phylo_param: 0.5,
    };
    for d in calc_deviations(&fit, &fit) {
        assert_eq!(d.absolute, 0.0);
        assert_eq!(d.percent, Some(0.0));
    }
}

#[test]
fn test_percent_deviation_undefined_at_zero_baseline() {
    assert_eq!(calc_percent_deviation(0.5, 0.0), None);
    assert_eq!(calc_percent_deviation(-0.5, 2.0), Some(25.0));
}

#[test]
fn test_randomization_p_value() {
    let null = [0.5, -0.8, 1.2, 0.1];
    assert_eq!(calc_randomization_p_value(0.01, &null), Some(1.0));
    assert_eq!(calc_randomization_p_value(-0.6, &null), Some(0.5));
    assert_eq!(calc_randomization_p_value(5.0, &null), Some(0.0));
    assert_eq!(calc_randomization_p_value(1.0, &[]), None);
}

#[test]
fn test_standardized() {
    let z = calc_standardized(&[1.0, -1.0, 0.0]);
    assert_eq!(z, vec![1.0, -1.0, 0.0]);
}
