use crate::error::Result;
use smc_structs::core::DeviceInfo;

/// Smallest multiple of `local` that is at least `requested`.
pub fn round_up(local: u32, requested: u32) -> u32 {
    assert!(local != 0, "local work size must be positive");
    let rem = requested % local;
    if rem == 0 {
        requested
    } else {
        requested + local - rem
    }
}

/// Capacity of the device buffers owned by one context, in samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferLayout {
    pub properties: usize,
    pub result_slots: usize,
    pub path_slots: usize,
    pub parameters: usize,
}

/// One N-dimensional sampling launch.
///
/// Sample `i < samples` draws its random stream from `sample_offset + i`, writes
/// its outcome byte for every property at `results_offset + i` and its path
/// length at `paths_offset + i`. Work items past `samples` do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub global_size: u32,
    pub local_size: u32,
    pub prng_seed: u64,
    pub samples: u32,
    pub sample_offset: u64,
    pub results_offset: u32,
    pub paths_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Complete,
    Failed(String),
}

/// A compute device with an asynchronous command queue, profiling events and
/// typed buffers.
pub trait Backend {
    type Queue;
    type Event;

    fn info(&self) -> &DeviceInfo;
    /// Compiles `source` and binds `entry_point`. Returns the preferred local work size.
    fn build(&mut self, source: &str, entry_point: &str) -> Result<u32>;
    fn allocate(&mut self, layout: BufferLayout) -> Result<()>;
    fn layout(&self) -> BufferLayout;
    fn create_queue(&mut self) -> Result<Self::Queue>;
    fn release_queue(&mut self, queue: Self::Queue);
    fn write_parameters(&mut self, queue: &Self::Queue, parameters: &[f32]) -> Result<()>;
    fn enqueue(&mut self, queue: &Self::Queue, launch: &Launch) -> Result<Self::Event>;
    fn flush(&mut self, queue: &Self::Queue) -> Result<()>;
    fn finish(&mut self, queue: &Self::Queue) -> Result<()>;
    fn status(&self, event: &Self::Event) -> EventStatus;
    fn wait(&self, event: &Self::Event) -> Result<()>;
    /// Device execution time of a completed launch.
    fn elapsed_ms(&self, event: &Self::Event) -> Result<f64>;
    fn read_outcomes(
        &mut self,
        queue: &Self::Queue,
        property: usize,
        start: usize,
        len: usize,
    ) -> Result<Vec<i8>>;
    fn read_path_lengths(&mut self, queue: &Self::Queue, start: usize, len: usize)
        -> Result<Vec<i32>>;
    /// Frees program and buffers. Safe to call more than once.
    fn release(&mut self);
}
