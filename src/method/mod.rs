pub mod aggregate;
pub mod generator;
pub mod matching;
pub mod null_dist;
pub mod runner;
pub mod sensitivity;
