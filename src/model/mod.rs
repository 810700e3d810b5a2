pub mod dataset;
pub mod error;
pub mod fit;
pub mod formula;
pub mod job;
pub mod params;
pub mod result;
pub mod tree;
