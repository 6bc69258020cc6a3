// src/experiments/mod.rs — A/B experiments over automation variants

pub mod ab;
pub mod significance;

pub use ab::{AbExperiment, ExperimentRegistry, ExperimentStatus};
pub use significance::{Observation, SignificanceResult, SignificanceTester, Variant};
