//! Host-memory emulation of accelerator devices.
//!
//! Emulated "device memory" is an ordinary heap buffer owned by the
//! [`DeviceMemory`] handle that allocated it. By default all queues created by
//! one backend share a single memory context, so an allocation made through
//! one queue stays valid on the others;
//! [`HostBackend::with_context_per_device`] gives every device its own context
//! instead, the way the OpenCL backend does. Transfers are real copies and are
//! counted, which makes the backend useful for observing how often the
//! coherence layer moves data.
//!
//! Faults can be injected at runtime through [`FaultInjection`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::DeviceClass;
use crate::error::{Error, Result};
use crate::hardware::{
    AcceleratorType, CommandQueue, ComputeBackend, DeviceInfo, DeviceMemory, HardwareStatistics,
    PlatformInfo, QueueCounters, RawAllocation,
};

/// Name of the platform created by [`HostBackend::new`].
pub const HOST_PLATFORM_NAME: &str = "Host Emulation";

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Switches that make the host backend fail on purpose.
#[derive(Debug, Default)]
pub struct FaultInjection {
    fail_allocations: AtomicBool,
    fail_transfers: AtomicBool,
    fail_queue_creation: AtomicBool,
}

impl FaultInjection {
    /// Makes subsequent device allocations fail.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent blocking transfers fail.
    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent queue creation fail.
    pub fn set_fail_queue_creation(&self, fail: bool) {
        self.fail_queue_creation.store(fail, Ordering::SeqCst);
    }

    fn allocations(&self) -> bool {
        self.fail_allocations.load(Ordering::SeqCst)
    }

    fn transfers(&self) -> bool {
        self.fail_transfers.load(Ordering::SeqCst)
    }

    fn queue_creation(&self) -> bool {
        self.fail_queue_creation.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct HostPlatform {
    name: String,
    devices: Vec<DeviceClass>,
}

/// Backend exposing emulated platforms and devices.
#[derive(Debug)]
pub struct HostBackend {
    platforms: Vec<HostPlatform>,
    faults: Arc<FaultInjection>,
    context_per_device: bool,
}

impl HostBackend {
    /// Creates a backend with one platform holding `devices` GPU-class devices.
    pub fn new(devices: usize) -> Self {
        Self::empty().with_platform(HOST_PLATFORM_NAME, &vec![DeviceClass::Gpu; devices])
    }

    /// Creates a backend with no platforms.
    pub fn empty() -> Self {
        Self {
            platforms: Vec::new(),
            faults: Arc::new(FaultInjection::default()),
            context_per_device: false,
        }
    }

    /// Adds a platform with one device per entry of `devices`.
    pub fn with_platform<S: Into<String>>(mut self, name: S, devices: &[DeviceClass]) -> Self {
        self.platforms.push(HostPlatform {
            name: name.into(),
            devices: devices.to_vec(),
        });
        self
    }

    /// Gives every queue its own memory context, so allocations are not
    /// usable across devices.
    pub fn with_context_per_device(mut self) -> Self {
        self.context_per_device = true;
        self
    }

    /// Fault switches shared with every queue this backend creates.
    pub fn faults(&self) -> Arc<FaultInjection> {
        Arc::clone(&self.faults)
    }

    fn platform(&self, platform: &PlatformInfo) -> Result<&HostPlatform> {
        self.platforms.get(platform.index).ok_or_else(|| {
            Error::HardwareInitialization(format!("Unknown host platform {}", platform.index))
        })
    }
}

impl ComputeBackend for HostBackend {
    fn accelerator_type(&self) -> AcceleratorType {
        AcceleratorType::Host
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        Ok(self
            .platforms
            .iter()
            .enumerate()
            .map(|(index, platform)| PlatformInfo {
                index,
                name: platform.name.clone(),
                vendor: "coherex".to_string(),
            })
            .collect())
    }

    fn devices(&self, platform: &PlatformInfo, class: DeviceClass) -> Result<Vec<DeviceInfo>> {
        let host = self.platform(platform)?;
        Ok(host
            .devices
            .iter()
            .enumerate()
            .filter(|(_, device_class)| class == DeviceClass::All || **device_class == class)
            .map(|(index, device_class)| DeviceInfo {
                index,
                name: format!("{} device {}", host.name, index),
                class: *device_class,
                global_memory: 0,
            })
            .collect())
    }

    fn create_queues(
        &self,
        platform: &PlatformInfo,
        devices: &[DeviceInfo],
    ) -> Result<Vec<Arc<dyn CommandQueue>>> {
        self.platform(platform)?;
        if self.faults.queue_creation() {
            return Err(Error::HardwareInitialization(
                "Injected queue creation failure".into(),
            ));
        }

        let shared_context = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        Ok(devices
            .iter()
            .map(|device| {
                let context_id = if self.context_per_device {
                    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
                } else {
                    shared_context
                };
                Arc::new(HostQueue {
                    device: device.clone(),
                    context_id,
                    faults: Arc::clone(&self.faults),
                    counters: QueueCounters::default(),
                }) as Arc<dyn CommandQueue>
            })
            .collect())
    }
}

/// Queue of one emulated device.
#[derive(Debug)]
pub struct HostQueue {
    device: DeviceInfo,
    context_id: usize,
    faults: Arc<FaultInjection>,
    counters: QueueCounters,
}

impl HostQueue {
    fn check_transfer(&self) -> Result<()> {
        if self.faults.transfers() {
            return Err(Error::Transfer(format!(
                "Injected transfer failure on device {}",
                self.device.index
            )));
        }
        Ok(())
    }
}

impl CommandQueue for HostQueue {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn context_id(&self) -> usize {
        self.context_id
    }

    fn allocate_raw(&self, bytes: usize) -> Result<RawAllocation> {
        if self.faults.allocations() {
            return Err(Error::DeviceAllocation {
                bytes,
                reason: "injected allocation failure".into(),
            });
        }
        self.counters.record_allocation();
        Ok(Box::new(vec![0u8; bytes]))
    }

    fn release_raw(&self, raw: RawAllocation) {
        self.counters.record_release();
        drop(raw);
    }

    fn write_blocking(&self, memory: &mut DeviceMemory, src: &[u8]) -> Result<()> {
        memory.check_span(src.len())?;
        self.check_transfer()?;
        let started = Instant::now();
        let storage = memory.raw_mut::<Vec<u8>>()?;
        storage[..src.len()].copy_from_slice(src);
        self.counters.record_upload(src.len(), started);
        Ok(())
    }

    fn read_blocking(&self, memory: &DeviceMemory, dst: &mut [u8]) -> Result<()> {
        memory.check_span(dst.len())?;
        self.check_transfer()?;
        let started = Instant::now();
        let storage = memory.raw::<Vec<u8>>()?;
        dst.copy_from_slice(&storage[..dst.len()]);
        self.counters.record_download(dst.len(), started);
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
    fn test_platform_and_device_enumeration() {
        let backend = HostBackend::empty()
            .with_platform("Vendor A", &[DeviceClass::Cpu])
            .with_platform("Vendor B", &[DeviceClass::Gpu, DeviceClass::Cpu, DeviceClass::Gpu]);

        let platforms = backend.platforms().unwrap();
        assert_eq!(platforms.len(), 2);
        assert_eq!(platforms[1].name, "Vendor B");

        let gpus = backend.devices(&platforms[1], DeviceClass::Gpu).unwrap();
        assert_eq!(gpus.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(backend.devices(&platforms[1], DeviceClass::All).unwrap().len(), 3);
        assert!(backend.devices(&platforms[0], DeviceClass::Gpu).unwrap().is_empty());
    }

    #[test]
    fn test_queues_share_one_context() {
        let backend = HostBackend::new(2);
        let platform = backend.platforms().unwrap().remove(0);
        let devices = backend.devices(&platform, DeviceClass::Gpu).unwrap();
        let queues = backend.create_queues(&platform, &devices).unwrap();

        let mut memory = DeviceMemory::allocate(&queues[0], 4).unwrap();
        assert!(memory.usable_on(&queues[1]));

        queues[0].write_blocking(&mut memory, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        queues[1].read_blocking(&memory, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(queues[0].statistics().bytes_uploaded, 4);
        assert_eq!(queues[1].statistics().downloads, 1);
    }

    #[test]
    fn test_context_per_device() {
        let backend = HostBackend::new(2).with_context_per_device();
        let platform = backend.platforms().unwrap().remove(0);
        let devices = backend.devices(&platform, DeviceClass::Gpu).unwrap();
        let queues = backend.create_queues(&platform, &devices).unwrap();

        assert_ne!(queues[0].context_id(), queues[1].context_id());
        let memory = DeviceMemory::allocate(&queues[0], 4).unwrap();
        assert!(memory.usable_on(&queues[0]));
        assert!(!memory.usable_on(&queues[1]));
    }

    #[test]
    fn test_injected_faults() {
        let backend = HostBackend::new(1);
        let faults = backend.faults();
        let platform = backend.platforms().unwrap().remove(0);
        let devices = backend.devices(&platform, DeviceClass::Gpu).unwrap();

        faults.set_fail_queue_creation(true);
        assert!(backend.create_queues(&platform, &devices).is_err());
        faults.set_fail_queue_creation(false);

        let queue = backend.create_queues(&platform, &devices).unwrap().remove(0);
        faults.set_fail_allocations(true);
        assert!(matches!(
            DeviceMemory::allocate(&queue, 8),
            Err(Error::DeviceAllocation { bytes: 8, .. })
        ));
        faults.set_fail_allocations(false);

        let mut memory = DeviceMemory::allocate(&queue, 8).unwrap();
        faults.set_fail_transfers(true);
        assert!(queue.write_blocking(&mut memory, &[0u8; 8]).is_err());
        assert_eq!(queue.statistics().uploads, 0);
    }
}
