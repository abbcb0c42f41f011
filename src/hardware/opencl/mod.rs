//! OpenCL backend.
//!
//! Platforms and devices are discovered through `opencl3`. Each selected device
//! gets its own context and an in-order command queue; device buffers are plain
//! `cl_mem` read/write buffers and all transfers are blocking.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use opencl3::command_queue::CommandQueue as ClCommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_GPU,
};
use opencl3::memory::{Buffer, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::types::{cl_device_id, cl_device_type, CL_BLOCKING};

use crate::config::DeviceClass;
use crate::error::{Error, Result};
use crate::hardware::{
    AcceleratorType, CommandQueue, ComputeBackend, DeviceInfo, DeviceMemory, HardwareStatistics,
    PlatformInfo, QueueCounters, RawAllocation,
};

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

fn class_of(device_type: cl_device_type) -> DeviceClass {
    if device_type & CL_DEVICE_TYPE_GPU != 0 {
        DeviceClass::Gpu
    } else if device_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceClass::Accelerator
    } else {
        DeviceClass::Cpu
    }
}

fn type_mask(class: DeviceClass) -> cl_device_type {
    match class {
        DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceClass::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceClass::All => CL_DEVICE_TYPE_ALL,
    }
}

/// Backend over the OpenCL ICD loader.
#[derive(Debug, Default)]
pub struct OpenClBackend;

impl OpenClBackend {
    /// Creates the backend. Discovery happens lazily.
    pub fn new() -> Self {
        Self
    }

    /// Whether at least one OpenCL platform is installed.
    pub fn is_available() -> bool {
        get_platforms().map(|p| !p.is_empty()).unwrap_or(false)
    }

    fn platform(&self, platform: &PlatformInfo) -> Result<Platform> {
        get_platforms()?
            .into_iter()
            .nth(platform.index)
            .ok_or_else(|| {
                Error::HardwareInitialization(format!(
                    "OpenCL platform {} disappeared",
                    platform.index
                ))
            })
    }

    fn device_ids(&self, platform: &PlatformInfo) -> Result<Vec<cl_device_id>> {
        Ok(self.platform(platform)?.get_devices(CL_DEVICE_TYPE_ALL)?)
    }
}

impl ComputeBackend for OpenClBackend {
    fn accelerator_type(&self) -> AcceleratorType {
        AcceleratorType::OpenCL
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        get_platforms()?
            .iter()
            .enumerate()
            .map(|(index, platform)| {
                Ok(PlatformInfo {
                    index,
                    name: platform.name()?,
                    vendor: platform.vendor().unwrap_or_default(),
                })
            })
            .collect()
    }

    fn devices(&self, platform: &PlatformInfo, class: DeviceClass) -> Result<Vec<DeviceInfo>> {
        let mask = type_mask(class);
        let mut devices = Vec::new();
        for (index, id) in self.device_ids(platform)?.into_iter().enumerate() {
            let device = Device::new(id);
            let device_type = device.dev_type()?;
            if device_type & mask == 0 {
                continue;
            }
            devices.push(DeviceInfo {
                index,
                name: device.name().unwrap_or_else(|_| format!("OpenCL device {}", index)),
                class: class_of(device_type),
                global_memory: device.global_mem_size().unwrap_or(0),
            });
        }
        Ok(devices)
    }

    fn create_queues(
        &self,
        platform: &PlatformInfo,
        devices: &[DeviceInfo],
    ) -> Result<Vec<Arc<dyn CommandQueue>>> {
        let ids = self.device_ids(platform)?;
        let mut queues: Vec<Arc<dyn CommandQueue>> = Vec::with_capacity(devices.len());

        for info in devices {
            let id = *ids.get(info.index).ok_or_else(|| {
                Error::HardwareInitialization(format!("OpenCL device {} disappeared", info.index))
            })?;
            let device = Device::new(id);
            let context = Context::from_device(&device).map_err(|e| {
                Error::HardwareInitialization(format!(
                    "Failed to create OpenCL context for {}: {}",
                    info.name, e
                ))
            })?;

            let queue = ClCommandQueue::create_default_with_properties(&context, 0, 0)
                .map_err(|e| {
                    Error::HardwareInitialization(format!(
                        "Failed to create OpenCL command queue for {}: {}",
                        info.name, e
                    ))
                })?;

            queues.push(Arc::new(OpenClQueue {
                device: info.clone(),
                context_id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                context,
                queue,
                counters: QueueCounters::default(),
            }));
        }

        Ok(queues)
    }
}

/// In-order command queue on one OpenCL device.
#[derive(Debug)]
pub struct OpenClQueue {
    device: DeviceInfo,
    context_id: usize,
    context: Context,
    queue: ClCommandQueue,
    counters: QueueCounters,
}

impl CommandQueue for OpenClQueue {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn context_id(&self) -> usize {
        self.context_id
    }

    fn allocate_raw(&self, bytes: usize) -> Result<RawAllocation> {
        let buffer = unsafe {
            Buffer::<u8>::create(&self.context, CL_MEM_READ_WRITE, bytes, ptr::null_mut())
        }
        .map_err(|e| Error::DeviceAllocation {
            bytes,
            reason: e.to_string(),
        })?;
        self.counters.record_allocation();
        Ok(Box::new(buffer))
    }

    fn release_raw(&self, raw: RawAllocation) {
        self.counters.record_release();
        // clReleaseMemObject runs in Buffer's Drop
        drop(raw);
    }

    fn write_blocking(&self, memory: &mut DeviceMemory, src: &[u8]) -> Result<()> {
        memory.check_span(src.len())?;
        let started = Instant::now();
        let buffer = memory.raw_mut::<Buffer<u8>>()?;
        unsafe {
            self.queue
                .enqueue_write_buffer(buffer, CL_BLOCKING, 0, src, &[])
                .map_err(|e| Error::Transfer(format!("host to device copy failed: {}", e)))?;
        }
        self.counters.record_upload(src.len(), started);
        Ok(())
    }

    fn read_blocking(&self, memory: &DeviceMemory, dst: &mut [u8]) -> Result<()> {
        memory.check_span(dst.len())?;
        let started = Instant::now();
        let buffer = memory.raw::<Buffer<u8>>()?;
        unsafe {
            self.queue
                .enqueue_read_buffer(buffer, CL_BLOCKING, 0, dst, &[])
                .map_err(|e| Error::Transfer(format!("device to host copy failed: {}", e)))?;
        }
        self.counters.record_download(dst.len(), started);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        self.queue.finish()?;
        Ok(())
    }

    fn statistics(&self) -> HardwareStatistics {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class_mapping() {
        assert_eq!(class_of(CL_DEVICE_TYPE_GPU), DeviceClass::Gpu);
        assert_eq!(class_of(CL_DEVICE_TYPE_ACCELERATOR), DeviceClass::Accelerator);
        assert_eq!(class_of(CL_DEVICE_TYPE_CPU), DeviceClass::Cpu);
        assert_eq!(type_mask(DeviceClass::All), CL_DEVICE_TYPE_ALL);
    }

    #[test]
    fn test_enumeration_does_not_panic_without_drivers() {
        let backend = OpenClBackend::new();
        if let Ok(platforms) = backend.platforms() {
            for platform in &platforms {
                let _ = backend.devices(platform, DeviceClass::All);
            }
        }
    }
}
