pub mod sort;
pub mod validation;
