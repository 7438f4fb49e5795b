use smc_estimators::EstimatorError;
use smc_sampler::RuntimeError;
use smc_structs::core::ProbeReport;
use thiserror::Error;

pub mod driver;
pub use driver::{Optimization, Optimizer, OptimizerState};
pub mod pool;
pub use pool::ProbePool;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error("model has no adaptation branches to optimize")]
    NoAdaptationBranches,
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Objective function of the search: estimates the satisfaction probability
/// of each candidate parameter vector.
pub trait Evaluator {
    /// Length of every parameter vector.
    fn dimension(&self) -> usize;
    /// Largest number of candidates one call can evaluate.
    fn capacity(&self) -> usize;
    /// Evaluates all `candidates` with `budget` samples each. Every candidate
    /// draws its random streams starting at `sample_offset`.
    fn evaluate(
        &mut self,
        candidates: &[Vec<f32>],
        budget: u64,
        sample_offset: u64,
    ) -> Result<Vec<ProbeReport>>;
    /// Frees every device resource held by the evaluator.
    fn release(&mut self);
}
