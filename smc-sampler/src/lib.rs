pub mod automaton;
pub mod context;
pub mod device;
pub mod error;
pub mod host;
pub mod kernel;
pub mod pool;
pub mod probe;
pub mod sampling;
#[cfg(feature = "cuda")]
pub mod cuda;

pub use automaton::{Automaton, Model};
pub use context::DeviceContext;
pub use device::{round_up, Backend};
pub use error::{Result, RuntimeError};
pub use probe::{PollStatus, Probe};
pub use sampling::SamplingState;

use smc_structs::core::DeviceInfo;

/// Every device this build can sample on.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    #[cfg(feature = "cuda")]
    {
        cuda::list_devices()
    }
    #[cfg(not(feature = "cuda"))]
    {
        Ok(host::list_devices())
    }
}

pub fn select_device(index: usize) -> Result<DeviceInfo> {
    let devices = list_devices()?;
    let count = devices.len();
    devices.into_iter().nth(index).ok_or_else(|| {
        RuntimeError::Precondition(format!(
            "device index {} out of range ({} devices)",
            index, count
        ))
    })
}
