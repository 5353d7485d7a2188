//! Training configuration and progress reporting

pub mod trainer;

pub use trainer::*;
