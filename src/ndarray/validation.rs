use ndarray::{ArrayBase, Data, Dimension};

pub fn contains_nan<S, D>(x: &ArrayBase<S, D>) -> bool
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    x.iter().any(|v| v.is_nan())
}

#[test]
fn test_contains_nan() {
    use ndarray::array;

    assert!(!contains_nan(&array![[1.0, 2.0], [3.0, 4.0]]));
    assert!(contains_nan(&array![[1.0, f64::NAN], [3.0, 4.0]]));
    assert!(contains_nan(&array![f64::NAN, 0.0]));
}
