use smc_structs::config::EstimatorConfig;
use thiserror::Error;

pub mod apmc;
pub use apmc::Apmc;
pub mod ci;
pub use ci::ConfidenceInterval;
pub mod ci_iterations;
pub use ci_iterations::CiIterations;
pub mod sprt;
pub use sprt::Sprt;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("invalid estimator parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

/// Accumulates boolean sample outcomes for one monitored property and decides
/// when enough samples exist.
pub trait Estimator: Send {
    fn clone_box(&self) -> Box<dyn Estimator>;
    fn name(&self) -> &'static str;
    fn set_expression(&mut self, expression: &str);
    fn expression(&self) -> &str;
    /// Exact sample count when it is known before simulation starts.
    fn required_samples(&self) -> Option<u64>;
    /// Rescales an a-priori sample count. Sequential estimators ignore it.
    fn set_sample_budget(&mut self, _samples: u64) {}
    fn add_sample(&mut self, satisfied: bool);
    fn should_stop_now(&mut self, samples_so_far: u64) -> bool;
    fn compute_missing_parameter_after_sim(&mut self);
    fn result(&self) -> f64;
    /// Confidence half width of `result`.
    fn missing_parameter(&self) -> f64;
    fn samples(&self) -> u64;
    fn reset(&mut self);
}

impl Clone for Box<dyn Estimator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Counts {
    pub successes: u64,
    pub samples: u64,
}

impl Counts {
    pub fn add(&mut self, satisfied: bool) {
        self.samples += 1;
        if satisfied {
            self.successes += 1;
        }
    }

    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.successes as f64 / self.samples as f64
        }
    }
}

pub(crate) fn check_probability(name: &'static str, value: f64) -> Result<f64, EstimatorError> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(EstimatorError::InvalidParameter {
            name,
            value,
            reason: "must lie strictly between 0 and 1",
        })
    }
}

pub fn from_config(config: &EstimatorConfig) -> Result<Box<dyn Estimator>, EstimatorError> {
    Ok(match *config {
        EstimatorConfig::Ci { alpha, samples } => {
            Box::new(ConfidenceInterval::new(alpha, samples)?)
        }
        EstimatorConfig::Apmc { epsilon, delta } => Box::new(Apmc::new(epsilon, delta)?),
        EstimatorConfig::CiIterations {
            alpha,
            width,
            min_samples,
        } => Box::new(CiIterations::new(alpha, width, min_samples)?),
        EstimatorConfig::Sprt {
            theta,
            delta,
            alpha,
            beta,
        } => Box::new(Sprt::new(theta, delta, alpha, beta)?),
    })
}
