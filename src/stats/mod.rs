pub mod deviation;
pub mod gls;
pub mod vec;
