use crate::{
    ci::{half_width, normal_quantile},
    Counts, Estimator, EstimatorError,
};

/// Sequential confidence interval: sampling continues until the interval half
/// width drops to `width`. The sample count is not known up front.
#[derive(Debug, Clone)]
pub struct CiIterations {
    expression: String,
    quantile: f64,
    target_width: f64,
    min_samples: u64,
    counts: Counts,
    width: f64,
}

impl CiIterations {
    pub fn new(alpha: f64, width: f64, min_samples: u64) -> Result<Self, EstimatorError> {
        if !(width > 0.0) {
            return Err(EstimatorError::InvalidParameter {
                name: "width",
                value: width,
                reason: "must be positive",
            });
        }
        Ok(Self {
            expression: String::new(),
            quantile: normal_quantile(alpha)?,
            target_width: width,
            min_samples: min_samples.max(1),
            counts: Counts::default(),
            width: f64::INFINITY,
        })
    }
}

impl Estimator for CiIterations {
    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "ci_iterations"
    }

    fn set_expression(&mut self, expression: &str) {
        self.expression = expression.to_string();
    }

    fn expression(&self) -> &str {
        &self.expression
    }

    fn required_samples(&self) -> Option<u64> {
        None
    }

    fn add_sample(&mut self, satisfied: bool) {
        self.counts.add(satisfied);
    }

    fn should_stop_now(&mut self, samples_so_far: u64) -> bool {
        if samples_so_far < self.min_samples {
            return false;
        }
        self.width = half_width(self.quantile, &self.counts);
        self.width <= self.target_width
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
