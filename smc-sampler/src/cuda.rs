use crate::device::{Backend, BufferLayout, EventStatus, Launch};
use crate::error::{Result, RuntimeError};
use cudarc::driver::{
    sys, CudaContext, CudaEvent, CudaFunction, CudaModule, CudaSlice, CudaStream, DriverError,
    LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;
use smc_structs::core::DeviceInfo;
use std::sync::Arc;
use tracing::{debug, info};

const PREFERRED_BLOCK_SIZE: u32 = 256;

fn device_info(ctx: &Arc<CudaContext>, index: usize) -> Result<DeviceInfo> {
    let name = ctx.name().map_err(|e| RuntimeError::device("device name", e))?;
    let max_threads = ctx
        .attribute(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)
        .map_err(|e| RuntimeError::device("device attribute", e))?;
    Ok(DeviceInfo {
        index,
        name,
        is_gpu: true,
        max_work_group_size: max_threads.max(0) as u32,
    })
}

pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let count = CudaContext::device_count().map_err(|e| RuntimeError::device("device count", e))?;
    (0..count.max(0) as usize)
        .map(|index| {
            let ctx =
                CudaContext::new(index).map_err(|e| RuntimeError::device("create context", e))?;
            device_info(&ctx, index)
        })
        .collect()
}

pub struct CudaLaunchEvent {
    start: CudaEvent,
    end: CudaEvent,
}

pub struct CudaBackend {
    info: DeviceInfo,
    ctx: Arc<CudaContext>,
    module: Option<Arc<CudaModule>>,
    function: Option<CudaFunction>,
    layout: BufferLayout,
    outcomes: Vec<CudaSlice<i8>>,
    paths: Option<CudaSlice<i32>>,
    parameters: Option<CudaSlice<f32>>,
}

impl CudaBackend {
    pub fn new(index: usize) -> Result<Self> {
        let count =
            CudaContext::device_count().map_err(|e| RuntimeError::device("device count", e))?;
        if index >= count.max(0) as usize {
            return Err(RuntimeError::Precondition(format!(
                "device index {} out of range ({} devices)",
                index, count
            )));
        }
        let ctx = CudaContext::new(index).map_err(|e| RuntimeError::device("create context", e))?;
        ctx.set_blocking_synchronize()
            .map_err(|e| RuntimeError::device("create context", e))?;
        let info = device_info(&ctx, index)?;
        info!("using device {}: {}", index, info.name);
        Ok(Self {
            info,
            ctx,
            module: None,
            function: None,
            layout: BufferLayout::default(),
            outcomes: Vec::new(),
            paths: None,
            parameters: None,
        })
    }

    fn function(&self) -> Result<&CudaFunction> {
        self.function.as_ref().ok_or_else(|| {
            RuntimeError::Precondition("launch on a program that was never built".to_string())
        })
    }
}

impl Backend for CudaBackend {
    type Queue = Arc<CudaStream>;
    type Event = CudaLaunchEvent;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build(&mut self, source: &str, entry_point: &str) -> Result<u32> {
        let ptx = compile_ptx(source).map_err(|e| RuntimeError::Build {
            diagnostic: format!("{:?}", e),
        })?;
        let module = self.ctx.load_module(ptx).map_err(|e| RuntimeError::Build {
            diagnostic: e.to_string(),
        })?;
        let function = module
            .load_function(entry_point)
            .map_err(|e| RuntimeError::Build {
                diagnostic: format!("failed to load '{}': {}", entry_point, e),
            })?;
        self.module = Some(module);
        self.function = Some(function);
        Ok(self.info.max_work_group_size.clamp(1, PREFERRED_BLOCK_SIZE))
    }

    fn allocate(&mut self, layout: BufferLayout) -> Result<()> {
        let stream = self.ctx.default_stream();
        let alloc_err = |e: DriverError| RuntimeError::device("allocate", e);
        self.outcomes = (0..layout.properties)
            .map(|_| stream.alloc_zeros::<i8>(layout.result_slots).map_err(alloc_err))
            .collect::<Result<Vec<_>>>()?;
        self.paths = Some(stream.alloc_zeros::<i32>(layout.path_slots).map_err(alloc_err)?);
        self.parameters = Some(
            stream
                .alloc_zeros::<f32>(layout.parameters.max(1))
                .map_err(alloc_err)?,
        );
        stream.synchronize().map_err(alloc_err)?;
        self.layout = layout;
        Ok(())
    }

    fn layout(&self) -> BufferLayout {
        self.layout
    }

    fn create_queue(&mut self) -> Result<Arc<CudaStream>> {
        self.ctx
            .new_stream()
            .map_err(|e| RuntimeError::device("create queue", e))
    }

    fn release_queue(&mut self, queue: Arc<CudaStream>) {
        if let Err(e) = queue.synchronize() {
            debug!("releasing queue that failed to drain: {}", e);
        }
    }

    fn write_parameters(&mut self, queue: &Arc<CudaStream>, parameters: &[f32]) -> Result<()> {
        let buffer = self.parameters.as_mut().ok_or_else(|| {
            RuntimeError::Precondition("parameter buffer is not allocated".to_string())
        })?;
        if parameters.is_empty() {
            return Ok(());
        }
        queue
            .memcpy_htod(parameters, &mut buffer.slice_mut(0..parameters.len()))
            .map_err(|e| RuntimeError::device("write parameters", e))
    }

    fn enqueue(&mut self, queue: &Arc<CudaStream>, launch: &Launch) -> Result<CudaLaunchEvent> {
        let function = self.function()?;
        let (parameters, paths) = match (&self.parameters, &self.paths) {
            (Some(parameters), Some(paths)) => (parameters, paths),
            _ => {
                return Err(RuntimeError::Precondition(
                    "sample buffers are not allocated".to_string(),
                ))
            }
        };
        let record = |context: &str| {
            queue
                .record_event(Some(sys::CUevent_flags::CU_EVENT_DEFAULT))
                .map_err(|e| RuntimeError::device(context, e))
        };
        let cfg = LaunchConfig {
            grid_dim: (launch.global_size / launch.local_size, 1, 1),
            block_dim: (launch.local_size, 1, 1),
            shared_mem_bytes: 0,
        };

        let start = record("record start event")?;
        let mut builder = queue.launch_builder(function);
        builder
            .arg(&launch.prng_seed)
            .arg(&launch.samples)
            .arg(&launch.sample_offset)
            .arg(&launch.results_offset)
            .arg(&launch.paths_offset)
            .arg(parameters)
            .arg(paths);
        for outcomes in self.outcomes.iter() {
            builder.arg(outcomes);
        }
        unsafe { builder.launch(cfg) }.map_err(|e| RuntimeError::device("enqueue", e))?;
        let end = record("record end event")?;
        Ok(CudaLaunchEvent { start, end })
    }

    fn flush(&mut self, _queue: &Arc<CudaStream>) -> Result<()> {
        // launches are submitted to the driver as they are enqueued
        Ok(())
    }

    fn finish(&mut self, queue: &Arc<CudaStream>) -> Result<()> {
        queue
            .synchronize()
            .map_err(|e| RuntimeError::device("finish", e))
    }

    fn status(&self, event: &CudaLaunchEvent) -> EventStatus {
        if event.end.is_complete() {
            EventStatus::Complete
        } else {
            EventStatus::Pending
        }
    }

    fn wait(&self, event: &CudaLaunchEvent) -> Result<()> {
        event
            .end
            .synchronize()
            .map_err(|e| RuntimeError::device("wait", e))
    }

    fn elapsed_ms(&self, event: &CudaLaunchEvent) -> Result<f64> {
        event
            .start
            .elapsed_ms(&event.end)
            .map(f64::from)
            .map_err(|e| RuntimeError::device("profiling", e))
    }

    fn read_outcomes(
        &mut self,
        queue: &Arc<CudaStream>,
        property: usize,
        start: usize,
        len: usize,
    ) -> Result<Vec<i8>> {
        let buffer = self.outcomes.get(property).ok_or_else(|| {
            RuntimeError::Precondition(format!("no result buffer for property {}", property))
        })?;
        queue
            .memcpy_dtov(&buffer.slice(start..start + len))
            .map_err(|e| RuntimeError::device("read results", e))
    }

    fn read_path_lengths(
        &mut self,
        queue: &Arc<CudaStream>,
        start: usize,
        len: usize,
    ) -> Result<Vec<i32>> {
        let buffer = self.paths.as_ref().ok_or_else(|| {
            RuntimeError::Precondition("path buffer is not allocated".to_string())
        })?;
        queue
            .memcpy_dtov(&buffer.slice(start..start + len))
            .map_err(|e| RuntimeError::device("read paths", e))
    }

    fn release(&mut self) {
        self.outcomes.clear();
        self.paths = None;
        self.parameters = None;
        self.function = None;
        self.module = None;
        self.layout = BufferLayout::default();
    }
}
