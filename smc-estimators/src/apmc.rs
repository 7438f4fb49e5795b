use crate::{check_probability, Counts, Estimator, EstimatorError};

/// Chernoff-Hoeffding bound: `N = ceil(ln(2 / delta) / (2 epsilon^2))` samples
/// give an estimate within `epsilon` with probability `1 - delta`.
#[derive(Debug, Clone)]
pub struct Apmc {
    expression: String,
    epsilon: f64,
    delta: f64,
    samples: u64,
    counts: Counts,
}

pub fn chernoff_samples(epsilon: f64, delta: f64) -> u64 {
    ((2.0 / delta).ln() / (2.0 * epsilon * epsilon)).ceil() as u64
}

impl Apmc {
    pub fn new(epsilon: f64, delta: f64) -> Result<Self, EstimatorError> {
        let epsilon = check_probability("epsilon", epsilon)?;
        let delta = check_probability("delta", delta)?;
        Ok(Self {
            expression: String::new(),
            epsilon,
            delta,
            samples: chernoff_samples(epsilon, delta),
            counts: Counts::default(),
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }
}

impl Estimator for Apmc {
    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "apmc"
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

    // a larger budget tightens epsilon at the same delta
    fn set_sample_budget(&mut self, samples: u64) {
        self.samples = samples.max(1);
        self.epsilon = ((2.0 / self.delta).ln() / (2.0 * self.samples as f64)).sqrt();
    }

    fn add_sample(&mut self, satisfied: bool) {
        self.counts.add(satisfied);
    }

    fn should_stop_now(&mut self, samples_so_far: u64) -> bool {
        samples_so_far >= self.samples
    }

    fn compute_missing_parameter_after_sim(&mut self) {}

    fn result(&self) -> f64 {
        self.counts.mean()
    }

    fn missing_parameter(&self) -> f64 {
        self.epsilon
    }

    fn samples(&self) -> u64 {
        self.counts.samples
    }

    fn reset(&mut self) {
        self.counts = Counts::default();
    }
}
