use bitvec::prelude::*;

use crate::model::error::{SensiError, SensiResult};

/// For two row masks of equal length, compute (a & !b).
pub fn mask_a_and_not_b(a: &BitSlice, b: &BitSlice) -> SensiResult<BitVec> {
    if a.len() != b.len() {
        return Err(SensiError::Error(format!("Row masks differ in length ({} and {}).", a.len(), b.len())));
    }
    Ok(a.iter().by_vals().zip(b.iter().by_vals()).map(|(x, y)| x && !y).collect())
}

#[test]
fn test_mask_a_and_not_b() {
    use rand::{thread_rng, Rng};

    let n_bits = 1_000;
    let mut a_vec = bitvec![0; n_bits];
    let mut b_vec = bitvec![0; n_bits];
    let mut expected_bv = bitvec![0; n_bits];

    let mut rng = thread_rng();
    for i in 0..n_bits {
        let a_val: bool = rng.gen();
        let b_val: bool = rng.gen();
        a_vec.set(i, a_val);
        b_vec.set(i, b_val);
        expected_bv.set(i, a_val & !b_val);
    }

    assert_eq!(mask_a_and_not_b(&a_vec, &b_vec).unwrap(), expected_bv);
    assert!(mask_a_and_not_b(&a_vec, &bitvec![0; 3]).is_err());
}
