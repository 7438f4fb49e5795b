use crate::context::DeviceContext;
use crate::device::Backend;
use crate::error::{Result, RuntimeError};
use smc_estimators::Estimator;
use smc_structs::config::RuntimeConfig;

mod adaptive;
pub use adaptive::Adaptive;
mod fixed;
pub use fixed::FixedCount;

/// Decodes one outcome byte of sample `sample`.
pub fn decode_outcome(outcome: i8, sample: u64) -> Result<bool> {
    match outcome {
        1 => Ok(true),
        0 => Ok(false),
        o if o > 1 => Err(RuntimeError::UnverifiedProperty {
            sample,
            outcome: o,
        }),
        _ => Err(RuntimeError::Deadlock { sample }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStats {
    pub min: i32,
    pub max: i32,
    pub sum: i64,
    pub count: u64,
}

impl Default for PathStats {
    fn default() -> Self {
        Self {
            min: i32::MAX,
            max: i32::MIN,
            sum: 0,
            count: 0,
        }
    }
}

impl PathStats {
    pub fn record(&mut self, lengths: &[i32]) {
        for &length in lengths {
            self.min = self.min.min(length);
            self.max = self.max.max(length);
            self.sum += length as i64;
        }
        self.count += lengths.len() as u64;
    }

    pub fn min(&self) -> Option<i32> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<i32> {
        (self.count > 0).then_some(self.max)
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

/// Counters shared by both sampling strategies. `submitted` grows when a
/// launch is enqueued, `confirmed` when its outcomes have been read back and
/// handed to the estimators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub submitted: u64,
    pub confirmed: u64,
    pub finished: bool,
    pub kernel_time_ms: f64,
    pub paths: PathStats,
}

/// Feeds `outcomes[property][i]` to the estimator of each property. The first
/// sample is numbered `first_sample`.
pub(crate) fn record_outcomes(
    estimators: &mut [Box<dyn Estimator>],
    outcomes: &[Vec<i8>],
    first_sample: u64,
) -> Result<()> {
    for (estimator, bytes) in estimators.iter_mut().zip(outcomes.iter()) {
        for (i, &byte) in bytes.iter().enumerate() {
            estimator.add_sample(decode_outcome(byte, first_sample + i as u64)?);
        }
    }
    Ok(())
}

pub(crate) fn to_offset(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        RuntimeError::Precondition(format!("buffer offset {} exceeds device addressing", value))
    })
}

/// Required sample count shared by every estimator, if each of them knows it up front.
pub fn required_samples(estimators: &[Box<dyn Estimator>]) -> Option<u64> {
    let mut required = None;
    for estimator in estimators.iter() {
        let n = estimator.required_samples()?;
        required = Some(required.map_or(n, |r: u64| r.max(n)));
    }
    required
}

pub enum SamplingState<B: Backend> {
    Fixed(FixedCount<B>),
    Adaptive(Adaptive<B>),
}

impl<B: Backend> SamplingState<B> {
    /// Fixed-count sampling when every estimator knows its sample count, adaptive otherwise.
    pub fn select(
        estimators: &[Box<dyn Estimator>],
        config: &RuntimeConfig,
        is_gpu: bool,
    ) -> Self {
        match required_samples(estimators) {
            Some(samples) => {
                SamplingState::Fixed(FixedCount::new(samples, config.direct_work_size(is_gpu)))
            }
            None => SamplingState::Adaptive(Adaptive::new(
                config.indirect_work_size(is_gpu),
                config.result_check_period,
                config.path_check_period,
            )),
        }
    }

    /// True if this state can be reset instead of rebuilt for `estimators`.
    pub fn fits(&self, estimators: &[Box<dyn Estimator>]) -> bool {
        match (self, required_samples(estimators)) {
            (SamplingState::Fixed(fixed), Some(samples)) => fixed.samples() == samples,
            (SamplingState::Adaptive(_), None) => true,
            _ => false,
        }
    }

    pub fn update_sampling(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        parameters: &[f32],
        sample_offset: u64,
    ) -> Result<()> {
        match self {
            SamplingState::Fixed(s) => s.update_sampling(ctx, queue, parameters, sample_offset),
            SamplingState::Adaptive(s) => s.update_sampling(ctx, queue, parameters, sample_offset),
        }
    }

    pub fn process_results(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        estimators: &mut [Box<dyn Estimator>],
    ) -> Result<bool> {
        match self {
            SamplingState::Fixed(s) => s.process_results(ctx, queue, estimators),
            SamplingState::Adaptive(s) => s.process_results(ctx, queue, estimators),
        }
    }

    /// Waits for every launch still on the device and discards its results.
    pub fn abandon(&mut self, ctx: &mut DeviceContext<B>, queue: &B::Queue) {
        match self {
            SamplingState::Fixed(s) => s.abandon(ctx, queue),
            SamplingState::Adaptive(s) => s.abandon(ctx, queue),
        }
    }

    pub fn reset(&mut self) {
        match self {
            SamplingState::Fixed(s) => s.reset(),
            SamplingState::Adaptive(s) => s.reset(),
        }
    }

    pub fn progress(&self) -> &Progress {
        match self {
            SamplingState::Fixed(s) => s.progress(),
            SamplingState::Adaptive(s) => s.progress(),
        }
    }

    pub fn has_finished(&self) -> bool {
        self.progress().finished
    }

    pub fn kernel_time_ms(&self) -> f64 {
        self.progress().kernel_time_ms
    }
}
