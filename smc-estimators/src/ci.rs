use crate::{check_probability, Counts, Estimator, EstimatorError};
use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided normal quantile `z` for confidence level `1 - alpha`.
pub(crate) fn normal_quantile(alpha: f64) -> Result<f64, EstimatorError> {
    let alpha = check_probability("alpha", alpha)?;
    let normal = Normal::new(0.0, 1.0).map_err(|_| EstimatorError::InvalidParameter {
        name: "alpha",
        value: alpha,
        reason: "standard normal unavailable",
    })?;
    Ok(normal.inverse_cdf(1.0 - alpha / 2.0))
}

pub(crate) fn half_width(quantile: f64, counts: &Counts) -> f64 {
    if counts.samples == 0 {
        return f64::INFINITY;
    }
    let p = counts.mean();
    quantile * (p * (1.0 - p) / counts.samples as f64).sqrt()
}

/// Confidence interval over a sample count fixed before simulation.
#[derive(Debug, Clone)]
pub struct ConfidenceInterval {
    expression: String,
    alpha: f64,
    quantile: f64,
    samples: u64,
    counts: Counts,
    width: f64,
}

impl ConfidenceInterval {
    pub fn new(alpha: f64, samples: u64) -> Result<Self, EstimatorError> {
        if samples == 0 {
            return Err(EstimatorError::InvalidParameter {
                name: "samples",
                value: 0.0,
                reason: "must be positive",
            });
        }
        Ok(Self {
            expression: String::new(),
            alpha,
            quantile: normal_quantile(alpha)?,
            samples,
            counts: Counts::default(),
            width: f64::INFINITY,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Estimator for ConfidenceInterval {
    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "ci"
    }

    fn set_expression(&mut self, expression: &str) {
        self.expression = expression.to_string();
    }

    fn expression(&self) -> &str {
        &self.expression
    }

    fn required_samples(&self) -> Option<u64> {
        Some(self.samples)
    }

    fn set_sample_budget(&mut self, samples: u64) {
        self.samples = samples.max(1);
    }

    fn add_sample(&mut self, satisfied: bool) {
        self.counts.add(satisfied);
    }

    fn should_stop_now(&mut self, samples_so_far: u64) -> bool {
        samples_so_far >= self.samples
    }

    fn compute_missing_parameter_after_sim(&mut self) {
        self.width = half_width(self.quantile, &self.counts);
    }

    fn result(&self) -> f64 {
        self.counts.mean()
    }

    fn missing_parameter(&self) -> f64 {
        self.width
    }

    fn samples(&self) -> u64 {
        self.counts.samples
    }

    fn reset(&mut self) {
        self.counts = Counts::default();
        self.width = f64::INFINITY;
    }
}
