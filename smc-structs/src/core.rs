use crate::serializable_struct_with_getters;
use serde::{Deserialize, Serialize};
use std::fmt;

// Model description
serializable_struct_with_getters! {
    ModelDescription {
        variables: Vec<VariableDescription>,
        commands: Vec<CommandDescription>,
    }
}
serializable_struct_with_getters! {
    VariableDescription {
        name: String,
        min_value: i32,
        max_value: i32,
        init_value: Option<i32>,
    }
}
serializable_struct_with_getters! {
    CommandDescription {
        module: String,
        #[serde(default)]
        label: String,
        guard: String,
        updates: Vec<String>,
    }
}

// Device child structs
serializable_struct_with_getters! {
    DeviceInfo {
        index: usize,
        name: String,
        is_gpu: bool,
        max_work_group_size: u32,
    }
}

// Simulation outputs
serializable_struct_with_getters! {
    ProbeReport {
        estimate: f64,
        half_width: f64,
        samples_submitted: u64,
        samples_confirmed: u64,
        kernel_time_ms: f64,
        min_path_length: i32,
        max_path_length: i32,
        avg_path_length: f64,
    }
}
impl ProbeReport {
    pub fn lower(&self) -> f64 {
        self.estimate - self.half_width
    }
    pub fn upper(&self) -> f64 {
        self.estimate + self.half_width
    }
}
serializable_struct_with_getters! {
    TrajectoryRecord {
        iteration: u64,
        sample_budget: u64,
        elapsed_secs: f64,
        samples_consumed: u64,
        estimate: f64,
        lower: f64,
        upper: f64,
        improved: bool,
        parameters: Vec<f32>,
    }
}

impl fmt::Display for TrajectoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.6} {} {:.6} {:.6} {:.6}",
            self.iteration,
            self.sample_budget,
            self.elapsed_secs,
            self.samples_consumed,
            self.estimate,
            self.lower,
            self.upper
        )?;
        for p in self.parameters.iter() {
            write!(f, " {}", p)?;
        }
        Ok(())
    }
}
