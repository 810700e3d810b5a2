/// Calculate the mean of a slice, NaN if empty.
pub fn calc_mean(x: &[f64]) -> f64 {
    let total: f64 = x.iter().sum();
    total / (x.len() as f64)
}

#[test]
fn test_calc_mean() {
    assert_eq!(calc_mean(&[1.0, 2.0, 3.0]), 2.0);
    assert_eq!(calc_mean(&[10.0, 20.0]), 15.0);
    assert!(calc_mean(&[]).is_nan());
}

/// Calculate the sample standard deviation (n - 1 denominator), NaN for fewer than two values.
pub fn calc_sample_stddev(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let mean = calc_mean(x);
    let total: f64 = x.iter().map(|&x_i| (x_i - mean).powi(2)).sum();
    (total / (x.len() - 1) as f64).sqrt()
}

#[test]
fn test_calc_sample_stddev() {
    assert_eq!(calc_sample_stddev(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2.5_f64.sqrt());
    assert_eq!(calc_sample_stddev(&[2.0, 4.0]), 2.0_f64.sqrt());
    assert!(calc_sample_stddev(&[1.0]).is_nan());
}

/// Empirical quantile with linear interpolation between order statistics.
pub fn calc_quantile(x: &[f64], q: f64) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    let mut sorted = x.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[test]
fn test_calc_quantile() {
    let x = [5.0, 1.0, 4.0, 2.0, 3.0];
    assert_eq!(calc_quantile(&x, 0.5), 3.0);
    assert_eq!(calc_quantile(&x, 0.0), 1.0);
    assert_eq!(calc_quantile(&x, 1.0), 5.0);
    assert_eq!(calc_quantile(&x, 0.25), 2.0);
    assert_eq!(calc_quantile(&[1.0, 2.0], 0.5), 1.5);
}
