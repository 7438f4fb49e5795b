use crate::serializable_struct_with_getters;
use serde::{Deserialize, Serialize};

serializable_struct_with_getters! {
    #[serde(default)]
    RuntimeConfig {
        max_path_length: u64,
        prng_seed: Option<u64>,
        direct_work_size_gpu: u32,
        direct_work_size_cpu: u32,
        indirect_work_size_gpu: u32,
        indirect_work_size_cpu: u32,
        result_check_period: usize,
        path_check_period: usize,
        local_work_size: Option<u32>,
        poll_interval_us: u64,
        entry_point: String,
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_path_length: 1000,
            prng_seed: None,
            direct_work_size_gpu: 100_000,
            direct_work_size_cpu: 10_000,
            indirect_work_size_gpu: 40_960,
            indirect_work_size_cpu: 4_096,
            result_check_period: 4,
            path_check_period: 8,
            local_work_size: None,
            poll_interval_us: 1000,
            entry_point: "sample_kernel".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn direct_work_size(&self, is_gpu: bool) -> u32 {
        if is_gpu {
            self.direct_work_size_gpu
        } else {
            self.direct_work_size_cpu
        }
    }

    pub fn indirect_work_size(&self, is_gpu: bool) -> u32 {
        if is_gpu {
            self.indirect_work_size_gpu
        } else {
            self.indirect_work_size_cpu
        }
    }
}

serializable_struct_with_getters! {
    #[serde(default)]
    OptimizerConfig {
        step: f32,
        initial_budget: u64,
        budget_cap: u64,
        budget_growth: f64,
        stale_batches_before_growth: u32,
        max_perturbed: usize,
        wide_model_threshold: usize,
        seed: Option<u64>,
        max_iterations: Option<u64>,
        time_limit_secs: Option<f64>,
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            step: 0.05,
            initial_budget: 40_000,
            budget_cap: 1_800_000,
            budget_growth: 1.1,
            stale_batches_before_growth: 2,
            max_perturbed: 3,
            wide_model_threshold: 5,
            seed: None,
            max_iterations: None,
            time_limit_secs: None,
        }
    }
}

impl OptimizerConfig {
    /// Number of coordinates perturbed per batch for a model with `branch_count` adaptation branches.
    pub fn perturbation_width(&self, branch_count: usize) -> usize {
        if branch_count > self.wide_model_threshold {
            self.max_perturbed
        } else {
            branch_count / 2 + 1
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EstimatorConfig {
    Ci { alpha: f64, samples: u64 },
    Apmc { epsilon: f64, delta: f64 },
    CiIterations { alpha: f64, width: f64, min_samples: u64 },
    Sprt { theta: f64, delta: f64, alpha: f64, beta: f64 },
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig::Ci {
            alpha: 0.01,
            samples: 40_000,
        }
    }
}
