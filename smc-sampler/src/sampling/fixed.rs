use super::{record_outcomes, to_offset, Progress};
use crate::context::DeviceContext;
use crate::device::Backend;
use crate::error::{Result, RuntimeError};
use smc_estimators::Estimator;
use tracing::debug;

/// Dispatches an exact sample count in chunks of at most `work_size`, then
/// reads everything back in one pass.
pub struct FixedCount<B: Backend> {
    samples: u64,
    work_size: u32,
    events: Vec<B::Event>,
    progress: Progress,
}

impl<B: Backend> FixedCount<B> {
    pub fn new(samples: u64, work_size: u32) -> Self {
        Self {
            samples,
            work_size,
            events: Vec::new(),
            progress: Progress::default(),
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn update_sampling(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        parameters: &[f32],
        sample_offset: u64,
    ) -> Result<()> {
        if self.progress.submitted >= self.samples {
            return Ok(());
        }
        if self.work_size == 0 {
            return Err(RuntimeError::Precondition(
                "work size must be positive".to_string(),
            ));
        }
        let capacity = to_offset(self.samples)? as usize;
        ctx.ensure_capacity(capacity, capacity)?;
        ctx.write_parameters(queue, parameters)?;
        while self.progress.submitted < self.samples {
            let chunk = (self.samples - self.progress.submitted).min(self.work_size as u64) as u32;
            let offset = to_offset(self.progress.submitted)?;
            let event = ctx.dispatch(
                queue,
                chunk,
                offset,
                offset,
                sample_offset + self.progress.submitted,
            )?;
            self.events.push(event);
            self.progress.submitted += chunk as u64;
        }
        ctx.flush(queue)?;
        debug!(
            "dispatched {} samples in {} launches",
            self.progress.submitted,
            self.events.len()
        );
        Ok(())
    }

    pub fn process_results(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        estimators: &mut [Box<dyn Estimator>],
    ) -> Result<bool> {
        if self.progress.finished {
            return Ok(true);
        }
        if self.progress.submitted < self.samples {
            return Err(RuntimeError::Precondition(
                "results processed before all samples were dispatched".to_string(),
            ));
        }
        ctx.finish(queue)?;
        for event in self.events.drain(..) {
            self.progress.kernel_time_ms += ctx.backend().elapsed_ms(&event)?;
        }
        let n = self.samples as usize;
        let outcomes = (0..estimators.len())
            .map(|property| ctx.read_outcomes(queue, property, 0, n))
            .collect::<Result<Vec<_>>>()?;
        record_outcomes(estimators, &outcomes, 0)?;
        let lengths = ctx.read_path_lengths(queue, 0, n)?;
        self.progress.paths.record(&lengths);
        self.progress.confirmed = self.samples;
        for estimator in estimators.iter_mut() {
            estimator.should_stop_now(self.progress.confirmed);
        }
        self.progress.finished = true;
        Ok(true)
    }

    pub fn abandon(&mut self, ctx: &mut DeviceContext<B>, queue: &B::Queue) {
        if let Err(e) = ctx.finish(queue) {
            debug!("queue failed to drain while abandoning: {}", e);
        }
        self.events.clear();
    }

    pub fn reset(&mut self) {
        self.events.clear();
        self.progress = Progress::default();
    }
}
