pub mod bitvec;
pub mod hash;
pub mod progress;
pub mod rayon;

#[cfg(test)]
pub mod fixtures;
