use crate::context::DeviceContext;
use crate::device::Backend;
use crate::error::{Result, RuntimeError};
use crate::sampling::{Progress, SamplingState};
use smc_estimators::Estimator;
use smc_structs::{config::RuntimeConfig, core::ProbeReport};
use std::{thread, time::Duration};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Finished,
    /// New samples were confirmed since the previous poll.
    Progressed,
    Idle,
}

/// Runs one parameter vector through a sampling state until its estimators
/// are satisfied. Owns its context and, while running, one queue on it.
pub struct Probe<B: Backend> {
    ctx: DeviceContext<B>,
    config: RuntimeConfig,
    estimators: Vec<Box<dyn Estimator>>,
    state: Option<SamplingState<B>>,
    queue: Option<B::Queue>,
    parameters: Vec<f32>,
    sample_offset: u64,
}

impl<B: Backend> Probe<B> {
    /// One estimator per property of `ctx`, in the same order.
    pub fn new(
        ctx: DeviceContext<B>,
        config: RuntimeConfig,
        estimators: Vec<Box<dyn Estimator>>,
    ) -> Result<Self> {
        if estimators.len() != ctx.properties().len() {
            return Err(RuntimeError::Precondition(format!(
                "{} estimators for {} properties",
                estimators.len(),
                ctx.properties().len()
            )));
        }
        Ok(Self {
            ctx,
            config,
            estimators,
            state: None,
            queue: None,
            parameters: Vec::new(),
            sample_offset: 0,
        })
    }

    pub fn context(&self) -> &DeviceContext<B> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DeviceContext<B> {
        &mut self.ctx
    }

    pub fn estimators(&self) -> &[Box<dyn Estimator>] {
        &self.estimators
    }

    pub fn state(&self) -> Option<&SamplingState<B>> {
        self.state.as_ref()
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.state.as_ref().map(SamplingState::progress)
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_some()
    }

    pub fn set_sample_budget(&mut self, samples: u64) {
        for estimator in self.estimators.iter_mut() {
            estimator.set_sample_budget(samples);
        }
    }

    /// Opens a queue and prepares a sampling state for `parameters`. Random
    /// streams start at `sample_offset`.
    pub fn start(&mut self, parameters: &[f32], sample_offset: u64) -> Result<()> {
        if self.is_running() {
            return Err(RuntimeError::Precondition(
                "probe started while a run is in progress".to_string(),
            ));
        }
        for estimator in self.estimators.iter_mut() {
            estimator.reset();
        }
        let reusable = self
            .state
            .as_ref()
            .is_some_and(|state| state.fits(&self.estimators));
        if reusable {
            if let Some(state) = self.state.as_mut() {
                state.reset();
            }
        } else {
            self.state = Some(SamplingState::select(
                &self.estimators,
                &self.config,
                self.ctx.info().is_gpu,
            ));
        }
        self.parameters = parameters.to_vec();
        self.sample_offset = sample_offset;
        self.queue = Some(self.ctx.create_queue()?);
        Ok(())
    }

    /// One dispatch/poll cycle. On error the run is abandoned and its queue released.
    pub fn poll(&mut self) -> Result<PollStatus> {
        let result = self.step();
        if let Err(e) = &result {
            error!(
                "probe on {} failed after {} confirmed samples: {}",
                self.ctx.info().name,
                self.progress().map_or(0, |p| p.confirmed),
                e
            );
            self.abort();
        }
        result
    }

    fn step(&mut self) -> Result<PollStatus> {
        let (Some(queue), Some(state)) = (self.queue.as_ref(), self.state.as_mut()) else {
            return Err(RuntimeError::Precondition(
                "probe polled before start".to_string(),
            ));
        };
        let before = state.progress().confirmed;
        state.update_sampling(&mut self.ctx, queue, &self.parameters, self.sample_offset)?;
        let finished = state.process_results(&mut self.ctx, queue, &mut self.estimators)?;
        let confirmed = state.progress().confirmed;
        if finished {
            if let Some(queue) = self.queue.take() {
                self.ctx.release_queue(queue);
            }
            return Ok(PollStatus::Finished);
        }
        Ok(if confirmed > before {
            PollStatus::Progressed
        } else {
            PollStatus::Idle
        })
    }

    /// Summary of a finished run.
    pub fn finish(&mut self) -> Result<ProbeReport> {
        let progress = match self.state.as_ref() {
            Some(state) if state.has_finished() => state.progress().clone(),
            _ => {
                return Err(RuntimeError::Precondition(
                    "probe report requested before the run finished".to_string(),
                ))
            }
        };
        for estimator in self.estimators.iter_mut() {
            estimator.compute_missing_parameter_after_sim();
        }
        let (estimate, half_width) = self
            .estimators
            .first()
            .map_or((0.0, 0.0), |e| (e.result(), e.missing_parameter()));
        let report = ProbeReport {
            estimate,
            half_width,
            samples_submitted: progress.submitted,
            samples_confirmed: progress.confirmed,
            kernel_time_ms: progress.kernel_time_ms,
            min_path_length: progress.paths.min().unwrap_or(0),
            max_path_length: progress.paths.max().unwrap_or(0),
            avg_path_length: progress.paths.average(),
        };
        debug!(
            "probe finished: estimate {:.6} +/- {:.6} from {} samples in {:.3}ms",
            report.estimate, report.half_width, report.samples_confirmed, report.kernel_time_ms
        );
        Ok(report)
    }

    /// Drives a full run, sleeping `poll_interval_us` between idle polls.
    pub fn run(&mut self, parameters: &[f32], sample_offset: u64) -> Result<ProbeReport> {
        self.start(parameters, sample_offset)?;
        let interval = Duration::from_micros(self.config.poll_interval_us);
        loop {
            match self.poll()? {
                PollStatus::Finished => break,
                PollStatus::Progressed => {}
                PollStatus::Idle => thread::sleep(interval),
            }
        }
        self.finish()
    }

    /// Waits for outstanding launches, discards their results and releases the queue.
    pub fn abort(&mut self) {
        if let Some(queue) = self.queue.take() {
            if let Some(state) = self.state.as_mut() {
                state.abandon(&mut self.ctx, &queue);
                state.reset();
            }
            self.ctx.release_queue(queue);
        }
    }
}

impl<B: Backend> Drop for Probe<B> {
    fn drop(&mut self) {
        self.abort();
    }
}
