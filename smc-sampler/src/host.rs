use crate::device::{Backend, BufferLayout, EventStatus, Launch};
use crate::error::{Result, RuntimeError};
use rand::{rngs::SmallRng, SeedableRng};
use smc_structs::core::DeviceInfo;
use std::cell::Cell;
use std::time::Instant;
use tracing::debug;

const HOST_MAX_WORK_GROUP_SIZE: u32 = 1024;
const HOST_PREFERRED_LOCAL_SIZE: u32 = 64;

/// Simulates one trace on the host. Writes one outcome byte per property and
/// returns the path length.
pub trait HostKernel {
    fn sample(&self, parameters: &[f32], rng: &mut SmallRng, outcomes: &mut [i8]) -> i32;
}

impl<F> HostKernel for F
where
    F: Fn(&[f32], &mut SmallRng, &mut [i8]) -> i32,
{
    fn sample(&self, parameters: &[f32], rng: &mut SmallRng, outcomes: &mut [i8]) -> i32 {
        self(parameters, rng, outcomes)
    }
}

pub fn list_devices() -> Vec<DeviceInfo> {
    vec![DeviceInfo {
        index: 0,
        name: "host".to_string(),
        is_gpu: false,
        max_work_group_size: HOST_MAX_WORK_GROUP_SIZE,
    }]
}

/// Random stream seed of the sample at absolute index `sample`.
pub fn sample_seed(prng_seed: u64, sample: u64) -> u64 {
    prng_seed.wrapping_add(sample.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[derive(Debug)]
pub struct HostQueue {
    id: usize,
}

impl HostQueue {
    pub fn id(&self) -> usize {
        self.id
    }
}

#[derive(Debug)]
pub struct HostEvent {
    polls_left: Cell<usize>,
    elapsed_ms: f64,
    failure: Option<String>,
}

/// Executes launches eagerly on the calling thread. Completion of each launch
/// is only reported after a scripted number of status polls, so callers see
/// the same asynchronous behaviour as on a device.
pub struct HostBackend<K> {
    info: DeviceInfo,
    kernel: K,
    entry_point: Option<String>,
    preferred_local_size: u32,
    layout: BufferLayout,
    outcomes: Vec<Vec<i8>>,
    paths: Vec<i32>,
    parameters: Vec<f32>,
    latency: Vec<usize>,
    fail_on_launch: Option<usize>,
    launches: Vec<Launch>,
    next_queue: usize,
    open_queues: usize,
    allocations: usize,
}

impl<K: HostKernel> HostBackend<K> {
    pub fn new(kernel: K) -> Self {
        let info = list_devices().remove(0);
        Self {
            info,
            kernel,
            entry_point: None,
            preferred_local_size: HOST_PREFERRED_LOCAL_SIZE,
            layout: BufferLayout::default(),
            outcomes: Vec::new(),
            paths: Vec::new(),
            parameters: Vec::new(),
            latency: Vec::new(),
            fail_on_launch: None,
            launches: Vec::new(),
            next_queue: 0,
            open_queues: 0,
            allocations: 0,
        }
    }

    pub fn with_preferred_local_size(mut self, size: u32) -> Self {
        self.preferred_local_size = size;
        self
    }

    /// Number of status polls each launch stays pending, cycled per launch.
    pub fn with_latency(mut self, latency: Vec<usize>) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the `n`-th launch (0 based) report a failed completion.
    pub fn with_failure_on_launch(mut self, n: usize) -> Self {
        self.fail_on_launch = Some(n);
        self
    }

    pub fn launches(&self) -> &[Launch] {
        &self.launches
    }

    pub fn open_queues(&self) -> usize {
        self.open_queues
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn parameters(&self) -> &[f32] {
        &self.parameters
    }

    fn check_range(&self, what: &str, end: usize, capacity: usize) -> Result<()> {
        if end > capacity {
            return Err(RuntimeError::Precondition(format!(
                "{} range ends at {} beyond capacity {}",
                what, end, capacity
            )));
        }
        Ok(())
    }
}

impl<K: HostKernel> Backend for HostBackend<K> {
    type Queue = HostQueue;
    type Event = HostEvent;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build(&mut self, source: &str, entry_point: &str) -> Result<u32> {
        if entry_point.is_empty() || !source.contains(entry_point) {
            return Err(RuntimeError::Build {
                diagnostic: format!("entry point '{}' is not defined in the source", entry_point),
            });
        }
        self.entry_point = Some(entry_point.to_string());
        Ok(self.preferred_local_size)
    }

    fn allocate(&mut self, layout: BufferLayout) -> Result<()> {
        self.outcomes = vec![vec![0; layout.result_slots]; layout.properties];
        self.paths = vec![0; layout.path_slots];
        self.parameters = vec![0.0; layout.parameters];
        self.layout = layout;
        self.allocations += 1;
        Ok(())
    }

    fn layout(&self) -> BufferLayout {
        self.layout
    }

    fn create_queue(&mut self) -> Result<HostQueue> {
        let queue = HostQueue {
            id: self.next_queue,
        };
        self.next_queue += 1;
        self.open_queues += 1;
        Ok(queue)
    }

    fn release_queue(&mut self, _queue: HostQueue) {
        self.open_queues = self.open_queues.saturating_sub(1);
    }

    fn write_parameters(&mut self, _queue: &HostQueue, parameters: &[f32]) -> Result<()> {
        if parameters.len() != self.layout.parameters {
            return Err(RuntimeError::Precondition(format!(
                "expected {} parameters, got {}",
                self.layout.parameters,
                parameters.len()
            )));
        }
        self.parameters.copy_from_slice(parameters);
        Ok(())
    }

    fn enqueue(&mut self, queue: &HostQueue, launch: &Launch) -> Result<HostEvent> {
        if self.entry_point.is_none() {
            return Err(RuntimeError::Precondition(
                "launch on a program that was never built".to_string(),
            ));
        }
        if launch.local_size == 0 || launch.global_size % launch.local_size != 0 {
            return Err(RuntimeError::Precondition(format!(
                "global size {} is not a multiple of local size {}",
                launch.global_size, launch.local_size
            )));
        }
        let samples = launch.samples as usize;
        let results_offset = launch.results_offset as usize;
        let paths_offset = launch.paths_offset as usize;
        self.check_range("result", results_offset + samples, self.layout.result_slots)?;
        self.check_range("path", paths_offset + samples, self.layout.path_slots)?;

        let start = Instant::now();
        let mut outcomes = vec![0i8; self.layout.properties];
        for i in 0..samples {
            let sample = launch.sample_offset + i as u64;
            let mut rng = SmallRng::seed_from_u64(sample_seed(launch.prng_seed, sample));
            let length = self.kernel.sample(&self.parameters, &mut rng, &mut outcomes);
            for (buffer, outcome) in self.outcomes.iter_mut().zip(outcomes.iter()) {
                buffer[results_offset + i] = *outcome;
            }
            self.paths[paths_offset + i] = length;
        }
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let n = self.launches.len();
        self.launches.push(*launch);
        let polls_left = match self.latency.len() {
            0 => 0,
            len => self.latency[n % len],
        };
        debug!(
            "host queue {}: launch {} ran {} samples in {:.3}ms",
            queue.id, n, samples, elapsed_ms
        );
        Ok(HostEvent {
            polls_left: Cell::new(polls_left),
            elapsed_ms,
            failure: (self.fail_on_launch == Some(n))
                .then(|| format!("launch {} failed on the host device", n)),
        })
    }

    fn flush(&mut self, _queue: &HostQueue) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self, _queue: &HostQueue) -> Result<()> {
        Ok(())
    }

    fn status(&self, event: &HostEvent) -> EventStatus {
        if let Some(failure) = &event.failure {
            return EventStatus::Failed(failure.clone());
        }
        match event.polls_left.get() {
            0 => EventStatus::Complete,
            n => {
                event.polls_left.set(n - 1);
                EventStatus::Pending
            }
        }
    }

    fn wait(&self, event: &HostEvent) -> Result<()> {
        if let Some(failure) = &event.failure {
            return Err(RuntimeError::device("wait", failure));
        }
        event.polls_left.set(0);
        Ok(())
    }

    fn elapsed_ms(&self, event: &HostEvent) -> Result<f64> {
        match &event.failure {
            Some(failure) => Err(RuntimeError::device("profiling", failure)),
            None => Ok(event.elapsed_ms),
        }
    }

    fn read_outcomes(
        &mut self,
        _queue: &HostQueue,
        property: usize,
        start: usize,
        len: usize,
    ) -> Result<Vec<i8>> {
        let buffer = self.outcomes.get(property).ok_or_else(|| {
            RuntimeError::Precondition(format!("no result buffer for property {}", property))
        })?;
        self.check_range("result", start + len, buffer.len())?;
        Ok(buffer[start..start + len].to_vec())
    }

    fn read_path_lengths(&mut self, _queue: &HostQueue, start: usize, len: usize) -> Result<Vec<i32>> {
        self.check_range("path", start + len, self.paths.len())?;
        Ok(self.paths[start..start + len].to_vec())
    }

    fn release(&mut self) {
        self.entry_point = None;
        self.outcomes.clear();
        self.paths.clear();
        self.parameters.clear();
        self.layout = BufferLayout::default();
    }
}
