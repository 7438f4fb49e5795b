use crate::{check_probability, Counts, Estimator, EstimatorError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// `p >= theta`
    Holds,
    /// `p < theta`
    Fails,
}

/// Wald's sequential probability ratio test for `p >= theta`, with an
/// indifference region of `delta` on either side and error bounds `alpha`
/// (false rejection) and `beta` (false acceptance).
#[derive(Debug, Clone)]
pub struct Sprt {
    expression: String,
    delta: f64,
    log_success: f64,
    log_failure: f64,
    accept_bound: f64,
    reject_bound: f64,
    log_ratio: f64,
    counts: Counts,
    decision: Option<Decision>,
}

impl Sprt {
    pub fn new(theta: f64, delta: f64, alpha: f64, beta: f64) -> Result<Self, EstimatorError> {
        let alpha = check_probability("alpha", alpha)?;
        let beta = check_probability("beta", beta)?;
        let p0 = check_probability("theta + delta", theta + delta)?;
        let p1 = check_probability("theta - delta", theta - delta)?;
        if !(delta > 0.0) {
            return Err(EstimatorError::InvalidParameter {
                name: "delta",
                value: delta,
                reason: "must be positive",
            });
        }
        Ok(Self {
            expression: String::new(),
            delta,
            log_success: (p1 / p0).ln(),
            log_failure: ((1.0 - p1) / (1.0 - p0)).ln(),
            accept_bound: (beta / (1.0 - alpha)).ln(),
            reject_bound: ((1.0 - beta) / alpha).ln(),
            log_ratio: 0.0,
            counts: Counts::default(),
            decision: None,
        })
    }

    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }
}

impl Estimator for Sprt {
    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "sprt"
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
        if self.decision.is_none() {
            self.log_ratio += if satisfied {
                self.log_success
            } else {
                self.log_failure
            };
        }
    }

    fn should_stop_now(&mut self, _samples_so_far: u64) -> bool {
        if self.decision.is_none() {
            if self.log_ratio <= self.accept_bound {
                self.decision = Some(Decision::Holds);
            } else if self.log_ratio >= self.reject_bound {
                self.decision = Some(Decision::Fails);
            }
        }
        self.decision.is_some()
    }

    fn compute_missing_parameter_after_sim(&mut self) {}

    fn result(&self) -> f64 {
        match self.decision {
            Some(Decision::Holds) => 1.0,
            Some(Decision::Fails) => 0.0,
            None => self.counts.mean(),
        }
    }

    fn missing_parameter(&self) -> f64 {
        self.delta
    }

    fn samples(&self) -> u64 {
        self.counts.samples
    }

    fn reset(&mut self) {
        self.counts = Counts::default();
        self.log_ratio = 0.0;
        self.decision = None;
    }
}
