use super::{record_outcomes, to_offset, Progress};
use crate::context::DeviceContext;
use crate::device::{Backend, EventStatus};
use crate::error::{Result, RuntimeError};
use crate::pool::IndexPool;
use smc_estimators::Estimator;
use std::collections::BTreeMap;
use tracing::debug;

/// Keeps the device busy with fixed-size launches until every estimator
/// agrees to stop.
///
/// Result and path buffers are split into `period` slots of `work_size`
/// samples each. A launch takes one free slot of each kind. Completed slots
/// are read back a whole period at a time and then become free again.
pub struct Adaptive<B: Backend> {
    work_size: u32,
    results: IndexPool,
    paths: IndexPool,
    in_flight: BTreeMap<(usize, usize), B::Event>,
    parameters_written: bool,
    progress: Progress,
}

impl<B: Backend> Adaptive<B> {
    pub fn new(work_size: u32, result_check_period: usize, path_check_period: usize) -> Self {
        Self {
            work_size,
            results: IndexPool::new(result_check_period),
            paths: IndexPool::new(path_check_period),
            in_flight: BTreeMap::new(),
            parameters_written: false,
            progress: Progress::default(),
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn result_pool(&self) -> &IndexPool {
        &self.results
    }

    pub fn path_pool(&self) -> &IndexPool {
        &self.paths
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &(usize, usize)> {
        self.in_flight.keys()
    }

    pub fn update_sampling(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        parameters: &[f32],
        sample_offset: u64,
    ) -> Result<()> {
        if self.progress.finished {
            return Ok(());
        }
        if self.work_size == 0 || self.results.period() == 0 || self.paths.period() == 0 {
            return Err(RuntimeError::Precondition(
                "work size and check periods must be positive".to_string(),
            ));
        }
        let work = self.work_size as usize;
        if !self.parameters_written {
            ctx.ensure_capacity(work * self.results.period(), work * self.paths.period())?;
            ctx.write_parameters(queue, parameters)?;
            self.parameters_written = true;
        }
        let mut launched = 0;
        while self.results.has_free() && self.paths.has_free() {
            let (Some(r), Some(p)) = (self.results.acquire(), self.paths.acquire()) else {
                break;
            };
            let event = ctx.dispatch(
                queue,
                self.work_size,
                to_offset((r * work) as u64)?,
                to_offset((p * work) as u64)?,
                sample_offset + self.progress.submitted,
            )?;
            self.in_flight.insert((r, p), event);
            self.progress.submitted += self.work_size as u64;
            launched += 1;
        }
        if launched > 0 {
            ctx.flush(queue)?;
            debug!("dispatched {} launches, {} in flight", launched, self.in_flight.len());
        }
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
        let mut completed = Vec::new();
        for (key, event) in self.in_flight.iter() {
            match ctx.backend().status(event) {
                EventStatus::Pending => {}
                EventStatus::Complete => completed.push(*key),
                EventStatus::Failed(message) => {
                    return Err(RuntimeError::Device {
                        context: format!("launch on slots {:?}", key),
                        message,
                    })
                }
            }
        }
        for key in completed {
            self.complete(ctx, key)?;
        }
        if self.results.is_batch_ready() {
            self.read_results(ctx, queue, estimators, self.results.period())?;
        }
        if self.paths.is_batch_ready() {
            self.read_paths(ctx, queue, self.paths.period())?;
        }

        let mut stop = !estimators.is_empty();
        for estimator in estimators.iter_mut() {
            let agrees = estimator.should_stop_now(self.progress.confirmed);
            stop = stop && agrees;
        }
        if stop {
            self.drain(ctx, queue, estimators)?;
        }
        Ok(self.progress.finished)
    }

    fn complete(&mut self, ctx: &DeviceContext<B>, key: (usize, usize)) -> Result<()> {
        if let Some(event) = self.in_flight.remove(&key) {
            self.progress.kernel_time_ms += ctx.backend().elapsed_ms(&event)?;
            self.results.mark_ready(key.0);
            self.paths.mark_ready(key.1);
        }
        Ok(())
    }

    /// Waits on everything still in flight and reads back every ready slot.
    fn drain(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        estimators: &mut [Box<dyn Estimator>],
    ) -> Result<()> {
        let keys: Vec<(usize, usize)> = self.in_flight.keys().copied().collect();
        for key in keys {
            if let Some(event) = self.in_flight.get(&key) {
                ctx.backend().wait(event)?;
            }
            self.complete(ctx, key)?;
        }
        self.read_results(ctx, queue, estimators, self.results.ready_len())?;
        self.read_paths(ctx, queue, self.paths.ready_len())?;
        self.progress.finished = true;
        debug!(
            "adaptive sampling finished: {} submitted, {} confirmed",
            self.progress.submitted, self.progress.confirmed
        );
        Ok(())
    }

    fn read_results(
        &mut self,
        ctx: &mut DeviceContext<B>,
        queue: &B::Queue,
        estimators: &mut [Box<dyn Estimator>],
        count: usize,
    ) -> Result<()> {
        let work = self.work_size as usize;
        for slot in self.results.release_ready(count) {
            let outcomes = (0..estimators.len())
                .map(|property| ctx.read_outcomes(queue, property, slot * work, work))
                .collect::<Result<Vec<_>>>()?;
            record_outcomes(estimators, &outcomes, self.progress.confirmed)?;
            self.progress.confirmed += work as u64;
        }
        Ok(())
    }

    fn read_paths(&mut self, ctx: &mut DeviceContext<B>, queue: &B::Queue, count: usize) -> Result<()> {
        let work = self.work_size as usize;
        for slot in self.paths.release_ready(count) {
            let lengths = ctx.read_path_lengths(queue, slot * work, work)?;
            self.progress.paths.record(&lengths);
        }
        Ok(())
    }

    pub fn abandon(&mut self, ctx: &mut DeviceContext<B>, queue: &B::Queue) {
        for (key, event) in std::mem::take(&mut self.in_flight) {
            if let Err(e) = ctx.backend().wait(&event) {
                debug!("launch on slots {:?} failed while abandoning: {}", key, e);
            }
            self.results.mark_ready(key.0);
            self.paths.mark_ready(key.1);
        }
        if let Err(e) = ctx.finish(queue) {
            debug!("queue failed to drain while abandoning: {}", e);
        }
    }

    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.results.reset();
        self.paths.reset();
        self.parameters_written = false;
        self.progress = Progress::default();
    }
}
