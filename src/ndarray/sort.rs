use std::cmp::Ordering;

/// Indices ordering the values by decreasing magnitude. NaN values sort last.
pub fn argsort_by_abs_desc(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&i, &j| {
        let (a, b) = (values[i].abs(), values[j].abs());
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        }
    });
    indices
}

#[test]
fn test_argsort_by_abs_desc() {
    assert_eq!(argsort_by_abs_desc(&[1.0, -3.0, 2.0]), vec![1, 2, 0]);
    assert_eq!(argsort_by_abs_desc(&[f64::NAN, 0.5, -4.0, 1.0]), vec![2, 3, 1, 0]);
}
