//! Accelerator abstraction for host/device buffer coherence.
//!
//! This module defines the narrow accelerator API the coherence layer is built
//! on: platform and device enumeration, one submission queue per device,
//! device-memory allocation and release, and blocking host↔device copies.
//!
//! Key components:
//!
//! * **`ComputeBackend`**: platform/device discovery and queue creation
//! * **`CommandQueue`**: per-device allocation and blocking transfers
//! * **`DeviceMemory`**: owning handle to one device allocation
//! * **`AcceleratorContext`**: the selected platform, its devices and their queues
//! * **Backends**: `HostBackend` (in-process emulation, always available) and
//!   `OpenClBackend` (feature `opencl`)

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

pub mod context;
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use crate::config::{BackendKind, DeviceClass};
pub use context::AcceleratorContext;
pub use host::{FaultInjection, HostBackend};
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;

use crate::config::Config;
use crate::error::{Error, Result};

/// Backend-specific device allocation, opaque to everything but its queue.
pub type RawAllocation = Box<dyn Any + Send + Sync>;

/// Types of accelerator backends available in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceleratorType {
    /// Devices emulated in host memory
    Host,
    /// OpenCL platforms and devices
    OpenCL,
}

impl fmt::Display for AcceleratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorType::Host => write!(f, "Host"),
            AcceleratorType::OpenCL => write!(f, "OpenCL"),
        }
    }
}

/// A compute platform reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Position in the backend's platform list
    pub index: usize,
    /// Platform name
    pub name: String,
    /// Platform vendor
    pub vendor: String,
}

/// A compute device reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the platform's full device list
    pub index: usize,
    /// Device name
    pub name: String,
    /// Device class
    pub class: DeviceClass,
    /// Global memory in bytes (0 when unknown)
    pub global_memory: u64,
}

/// Transfer and allocation counters for one queue, or aggregated over a context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HardwareStatistics {
    /// Device allocations performed
    pub allocations: usize,
    /// Device allocations released
    pub releases: usize,
    /// Blocking host→device copies
    pub uploads: usize,
    /// Blocking device→host copies
    pub downloads: usize,
    /// Bytes copied host→device
    pub bytes_uploaded: u64,
    /// Bytes copied device→host
    pub bytes_downloaded: u64,
    /// Total time spent in blocking transfers (ms)
    pub total_time_ms: f64,
}

impl HardwareStatistics {
    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &HardwareStatistics) {
        self.allocations += other.allocations;
        self.releases += other.releases;
        self.uploads += other.uploads;
        self.downloads += other.downloads;
        self.bytes_uploaded += other.bytes_uploaded;
        self.bytes_downloaded += other.bytes_downloaded;
        self.total_time_ms += other.total_time_ms;
    }

    /// Allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.allocations.saturating_sub(self.releases)
    }
}

/// Lock-free counters shared by the queue implementations.
#[derive(Debug, Default)]
pub struct QueueCounters {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    transfer_nanos: AtomicU64,
}

impl QueueCounters {
    /// Records one device allocation.
    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one device release.
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished host→device copy that started at `started`.
    pub fn record_upload(&self, bytes: usize, started: Instant) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes as u64, Ordering::Relaxed);
        self.add_elapsed(started);
    }

    /// Records a finished device→host copy that started at `started`.
    pub fn record_download(&self, bytes: usize, started: Instant) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes as u64, Ordering::Relaxed);
        self.add_elapsed(started);
    }

    fn add_elapsed(&self, started: Instant) {
        let nanos = started.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.transfer_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot of the counters.
    pub fn snapshot(&self) -> HardwareStatistics {
        HardwareStatistics {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            total_time_ms: self.transfer_nanos.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Platform and device discovery for one accelerator API.
pub trait ComputeBackend: fmt::Debug + Send + Sync {
    /// Returns the type of this backend.
    fn accelerator_type(&self) -> AcceleratorType;

    /// Enumerates the platforms this backend can see.
    fn platforms(&self) -> Result<Vec<PlatformInfo>>;

    /// Enumerates the devices of `class` on `platform`.
    ///
    /// `DeviceClass::All` returns every device of the platform.
    fn devices(&self, platform: &PlatformInfo, class: DeviceClass) -> Result<Vec<DeviceInfo>>;

    /// Creates one submission queue per device, in the order given.
    ///
    /// Fails as a whole if any queue cannot be created.
    fn create_queues(
        &self,
        platform: &PlatformInfo,
        devices: &[DeviceInfo],
    ) -> Result<Vec<Arc<dyn CommandQueue>>>;
}

/// Submission queue bound to one device.
///
/// Commands issued on one queue execute in issue order. Transfers are blocking:
/// they return once the copy has completed.
pub trait CommandQueue: fmt::Debug + Send + Sync {
    /// Returns the device this queue submits to.
    fn device(&self) -> &DeviceInfo;

    /// Identifies the memory context of this queue.
    ///
    /// Allocations made through one queue are valid on every queue with the
    /// same context id.
    fn context_id(&self) -> usize;

    /// Allocates `bytes` bytes of device memory.
    fn allocate_raw(&self, bytes: usize) -> Result<RawAllocation>;

    /// Releases an allocation made by `allocate_raw` on a queue of the same context.
    fn release_raw(&self, raw: RawAllocation);

    /// Copies `src` into the start of `memory`, blocking until done.
    fn write_blocking(&self, memory: &mut DeviceMemory, src: &[u8]) -> Result<()>;

    /// Copies the start of `memory` into `dst`, blocking until done.
    fn read_blocking(&self, memory: &DeviceMemory, dst: &mut [u8]) -> Result<()>;

    /// Blocks until every command issued on this queue has completed.
    fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Returns the counters for this queue.
    fn statistics(&self) -> HardwareStatistics;
}

/// Owning handle to one device allocation.
///
/// The allocation is released through the queue that created it, exactly once,
/// when the handle is dropped.
pub struct DeviceMemory {
    bytes: usize,
    raw: Option<RawAllocation>,
    owner: Arc<dyn CommandQueue>,
}

impl DeviceMemory {
    /// Allocates `bytes` bytes on the device behind `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is zero or the backend cannot allocate.
    pub fn allocate(queue: &Arc<dyn CommandQueue>, bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::InvalidInput(
                "Device allocation size must be greater than zero".into(),
            ));
        }
        let raw = queue.allocate_raw(bytes)?;
        tracing::debug!(
            "Allocated {} bytes on device {} ({})",
            bytes,
            queue.device().index,
            queue.device().name
        );
        Ok(Self {
            bytes,
            raw: Some(raw),
            owner: Arc::clone(queue),
        })
    }

    /// Size of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether the allocation is empty (never true for a live allocation).
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Queue that created the allocation.
    pub fn owner(&self) -> &Arc<dyn CommandQueue> {
        &self.owner
    }

    /// Whether this allocation can be used through `queue`.
    pub fn usable_on(&self, queue: &Arc<dyn CommandQueue>) -> bool {
        self.owner.context_id() == queue.context_id()
    }

    /// Checks that a transfer of `len` bytes fits in the allocation.
    pub fn check_span(&self, len: usize) -> Result<()> {
        if len > self.bytes {
            return Err(Error::Transfer(format!(
                "transfer of {} bytes exceeds device allocation of {} bytes",
                len, self.bytes
            )));
        }
        Ok(())
    }

    /// Borrows the backend allocation as `T`.
    pub fn raw<T: Any>(&self) -> Result<&T> {
        self.raw
            .as_ref()
            .and_then(|raw| raw.downcast_ref::<T>())
            .ok_or_else(|| Error::Internal("Device allocation has an unexpected type".into()))
    }

    /// Mutably borrows the backend allocation as `T`.
    pub fn raw_mut<T: Any>(&mut self) -> Result<&mut T> {
        self.raw
            .as_mut()
            .and_then(|raw| raw.downcast_mut::<T>())
            .ok_or_else(|| Error::Internal("Device allocation has an unexpected type".into()))
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            tracing::debug!(
                "Releasing {} bytes on device {}",
                self.bytes,
                self.owner.device().index
            );
            self.owner.release_raw(raw);
        }
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("bytes", &self.bytes)
            .field("device", &self.owner.device().index)
            .field("context", &self.owner.context_id())
            .finish()
    }
}

/// Creates the backend named by the configuration.
///
/// `BackendKind::Auto` prefers OpenCL when it is compiled in and reports at
/// least one platform, and falls back to host emulation otherwise.
pub fn create_backend(config: &Config) -> Result<Arc<dyn ComputeBackend>> {
    match config.backend() {
        BackendKind::Host => Ok(Arc::new(HostBackend::new(config.emulated_devices()))),
        BackendKind::OpenCL => {
            #[cfg(feature = "opencl")]
            {
                Ok(Arc::new(OpenClBackend::new()))
            }
            #[cfg(not(feature = "opencl"))]
            {
                Err(Error::HardwareUnavailable(
                    "OpenCL is not available in this build".into(),
                ))
            }
        }
        BackendKind::Auto => {
            #[cfg(feature = "opencl")]
            {
                if OpenClBackend::is_available() {
                    return Ok(Arc::new(OpenClBackend::new()));
                }
                tracing::info!("No OpenCL platform found, using host emulation");
            }
            Ok(Arc::new(HostBackend::new(config.emulated_devices())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_queue(backend: &HostBackend) -> Arc<dyn CommandQueue> {
        let platform = backend.platforms().unwrap().remove(0);
        let devices = backend.devices(&platform, DeviceClass::All).unwrap();
        backend.create_queues(&platform, &devices).unwrap().remove(0)
    }

    #[test]
    fn test_device_memory_released_once_on_drop() {
        let backend = HostBackend::new(1);
        let queue = first_queue(&backend);

        let memory = DeviceMemory::allocate(&queue, 64).unwrap();
        assert_eq!(memory.len(), 64);
        assert_eq!(queue.statistics().live_allocations(), 1);

        drop(memory);
        let stats = queue.statistics();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn test_zero_sized_allocation_rejected() {
        let backend = HostBackend::new(1);
        let queue = first_queue(&backend);
        assert!(matches!(
            DeviceMemory::allocate(&queue, 0),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(queue.statistics().allocations, 0);
    }

    #[test]
    fn test_transfer_larger_than_allocation_rejected() {
        let backend = HostBackend::new(1);
        let queue = first_queue(&backend);
        let mut memory = DeviceMemory::allocate(&queue, 4).unwrap();
        assert!(matches!(
            queue.write_blocking(&mut memory, &[0u8; 8]),
            Err(Error::Transfer(_))
        ));
    }

    #[test]
    fn test_statistics_merge() {
        let mut total = HardwareStatistics {
            uploads: 1,
            bytes_uploaded: 10,
            ..HardwareStatistics::default()
        };
        total.merge(&HardwareStatistics {
            uploads: 2,
            downloads: 1,
            bytes_uploaded: 5,
            ..HardwareStatistics::default()
        });
        assert_eq!(total.uploads, 3);
        assert_eq!(total.downloads, 1);
        assert_eq!(total.bytes_uploaded, 15);
    }

    #[test]
    fn test_create_backend_host() {
        let config = Config::new()
            .with_backend(BackendKind::Host)
            .with_emulated_devices(2);
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.accelerator_type(), AcceleratorType::Host);
        let platform = backend.platforms().unwrap().remove(0);
        assert_eq!(backend.devices(&platform, DeviceClass::All).unwrap().len(), 2);
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_create_backend_opencl_unavailable() {
        let config = Config::new().with_backend(BackendKind::OpenCL);
        assert!(matches!(
            create_backend(&config),
            Err(Error::HardwareUnavailable(_))
        ));
    }
}
