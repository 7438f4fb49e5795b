use crate::automaton::Automaton;
use crate::device::{round_up, Backend, BufferLayout, Launch};
use crate::error::{Result, RuntimeError};
use crate::kernel::KernelSource;
use smc_structs::{config::RuntimeConfig, core::DeviceInfo};
use tracing::{debug, info};

/// A device with a sampling kernel built for one model and property set, and
/// the sample buffers that kernel writes into.
pub struct DeviceContext<B: Backend> {
    backend: B,
    properties: Vec<String>,
    parameter_count: usize,
    local_size: u32,
    prng_seed: u64,
    submitted: u64,
    released: bool,
}

impl<B: Backend> DeviceContext<B> {
    pub fn build(
        mut backend: B,
        automaton: &dyn Automaton,
        properties: &[String],
        source: &dyn KernelSource,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        if properties.is_empty() {
            return Err(RuntimeError::Precondition(
                "a context needs at least one property".to_string(),
            ));
        }
        let text = source.generate(config, automaton, properties)?;
        let preferred = backend.build(&text, &config.entry_point)?;
        let local_size = config.local_work_size.unwrap_or(preferred);
        let max_size = backend.info().max_work_group_size;
        if local_size == 0 || local_size > max_size {
            return Err(RuntimeError::Precondition(format!(
                "local work size {} outside 1..={}",
                local_size, max_size
            )));
        }
        let parameter_count = automaton.adaptation_branch_count();
        backend.allocate(BufferLayout {
            properties: properties.len(),
            result_slots: 0,
            path_slots: 0,
            parameters: parameter_count,
        })?;
        let prng_seed = smc_utils::seed_or_clock(config.prng_seed);
        info!(
            "built '{}' on {} for {} properties, {} parameters, local size {}",
            config.entry_point,
            backend.info().name,
            properties.len(),
            parameter_count,
            local_size
        );
        Ok(Self {
            backend,
            properties: properties.to_vec(),
            parameter_count,
            local_size,
            prng_seed,
            submitted: 0,
            released: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn info(&self) -> &DeviceInfo {
        self.backend.info()
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn local_size(&self) -> u32 {
        self.local_size
    }

    pub fn prng_seed(&self) -> u64 {
        self.prng_seed
    }

    /// Samples enqueued over the lifetime of this context.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn layout(&self) -> BufferLayout {
        self.backend.layout()
    }

    /// Grows the sample buffers to at least the given slot counts. Existing
    /// buffers are kept when they are large enough.
    pub fn ensure_capacity(&mut self, result_slots: usize, path_slots: usize) -> Result<()> {
        self.check_live()?;
        let layout = self.backend.layout();
        if layout.result_slots >= result_slots && layout.path_slots >= path_slots {
            return Ok(());
        }
        let layout = BufferLayout {
            result_slots: layout.result_slots.max(result_slots),
            path_slots: layout.path_slots.max(path_slots),
            ..layout
        };
        debug!(
            "allocating {} result slots x {} properties, {} path slots",
            layout.result_slots, layout.properties, layout.path_slots
        );
        self.backend.allocate(layout)
    }

    pub fn create_queue(&mut self) -> Result<B::Queue> {
        self.check_live()?;
        self.backend.create_queue()
    }

    pub fn release_queue(&mut self, queue: B::Queue) {
        self.backend.release_queue(queue);
    }

    pub fn write_parameters(&mut self, queue: &B::Queue, parameters: &[f32]) -> Result<()> {
        if parameters.len() != self.parameter_count {
            return Err(RuntimeError::Precondition(format!(
                "expected {} parameters, got {}",
                self.parameter_count,
                parameters.len()
            )));
        }
        self.backend.write_parameters(queue, parameters)
    }

    /// Enqueues `samples` samples whose outcomes land at `results_offset` and
    /// path lengths at `paths_offset`. `sample_offset` selects their random streams.
    pub fn dispatch(
        &mut self,
        queue: &B::Queue,
        samples: u32,
        results_offset: u32,
        paths_offset: u32,
        sample_offset: u64,
    ) -> Result<B::Event> {
        self.check_live()?;
        if samples == 0 {
            return Err(RuntimeError::Precondition(
                "dispatch of zero samples".to_string(),
            ));
        }
        let launch = Launch {
            global_size: round_up(self.local_size, samples),
            local_size: self.local_size,
            prng_seed: self.prng_seed,
            samples,
            sample_offset,
            results_offset,
            paths_offset,
        };
        let event = self.backend.enqueue(queue, &launch)?;
        self.submitted += samples as u64;
        debug!(
            "enqueued {} samples (global {}) at results {} paths {} rng {}",
            samples, launch.global_size, results_offset, paths_offset, sample_offset
        );
        Ok(event)
    }

    pub fn flush(&mut self, queue: &B::Queue) -> Result<()> {
        self.backend.flush(queue)
    }

    pub fn finish(&mut self, queue: &B::Queue) -> Result<()> {
        self.backend.finish(queue)
    }

    pub fn read_outcomes(
        &mut self,
        queue: &B::Queue,
        property: usize,
        start: usize,
        len: usize,
    ) -> Result<Vec<i8>> {
        self.backend.read_outcomes(queue, property, start, len)
    }

    pub fn read_path_lengths(&mut self, queue: &B::Queue, start: usize, len: usize) -> Result<Vec<i32>> {
        self.backend.read_path_lengths(queue, start, len)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if !self.released {
            self.backend.release();
            self.released = true;
            debug!("released context on {}", self.backend.info().name);
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.released {
            return Err(RuntimeError::Precondition(
                "use of a released device context".to_string(),
            ));
        }
        Ok(())
    }
}

impl<B: Backend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        self.release();
    }
}
