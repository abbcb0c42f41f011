//! Accelerator context: the selected platform, its devices and one queue per device.
//!
//! A context is normally built once and shared by reference (`Arc`) with every
//! buffer cache that needs device access. A process-wide instance is also
//! available through [`AcceleratorContext::instance`] for callers that cannot
//! thread a handle through; its lifetime ends only at an explicit
//! [`AcceleratorContext::destroy_instance`].

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::config::{Config, DeviceClass};
use crate::error::{Error, Result};
use crate::hardware::{
    create_backend, AcceleratorType, CommandQueue, ComputeBackend, DeviceInfo, HardwareStatistics,
    PlatformInfo,
};

lazy_static! {
    static ref GLOBAL_CONTEXT: Mutex<Option<Arc<AcceleratorContext>>> = Mutex::new(None);
}

/// Selected platform, devices and per-device queues.
///
/// `queues[i]` always submits to `devices[i]`; both sequences are fixed at
/// construction and never empty.
pub struct AcceleratorContext {
    accelerator_type: AcceleratorType,
    platform: PlatformInfo,
    devices: Vec<DeviceInfo>,
    queues: Vec<Arc<dyn CommandQueue>>,
}

impl AcceleratorContext {
    /// Discovers a platform and its devices through `backend` and creates one
    /// queue per device.
    ///
    /// The platform is the first whose name contains the configured preferred
    /// platform (case-insensitive), or the first platform when there is no
    /// preference or no match. Devices are those of the configured class, or
    /// every device of the platform when none of that class exist.
    ///
    /// # Errors
    ///
    /// Returns `HardwareUnavailable` when there is no platform or the selected
    /// platform has no devices, and `HardwareInitialization` when any queue
    /// cannot be created. No partially built context is ever returned.
    pub fn new(backend: &dyn ComputeBackend, config: &Config) -> Result<Self> {
        let platforms = backend.platforms()?;
        if platforms.is_empty() {
            return Err(Error::HardwareUnavailable(format!(
                "No {} platforms found",
                backend.accelerator_type()
            )));
        }

        let platform = select_platform(platforms, config.preferred_platform());
        let devices = select_devices(backend, &platform, config.device_class())?;

        let queues = backend
            .create_queues(&platform, &devices)
            .map_err(|e| match e {
                Error::HardwareInitialization(_) => e,
                other => Error::HardwareInitialization(format!(
                    "Queue creation failed on {}: {}",
                    platform.name, other
                )),
            })?;
        if queues.len() != devices.len() {
            return Err(Error::HardwareInitialization(format!(
                "Backend created {} queue(s) for {} device(s)",
                queues.len(),
                devices.len()
            )));
        }

        tracing::info!(
            "Accelerator context on platform '{}' with {} device(s)",
            platform.name,
            devices.len()
        );

        Ok(Self {
            accelerator_type: backend.accelerator_type(),
            platform,
            devices,
            queues,
        })
    }

    /// Builds a context with the backend named by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(config)?;
        Self::new(backend.as_ref(), config)
    }

    /// Installs a context built from `config` as the process-wide instance.
    ///
    /// Fails with `InvalidState` if an instance already exists.
    pub fn initialize_global(config: &Config) -> Result<Arc<Self>> {
        let mut global = GLOBAL_CONTEXT.lock();
        if global.is_some() {
            return Err(Error::InvalidState(
                "Accelerator context is already initialized".into(),
            ));
        }
        let context = Arc::new(Self::from_config(config)?);
        *global = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Returns the process-wide instance, building it from the default
    /// configuration on first use.
    pub fn instance() -> Result<Arc<Self>> {
        let mut global = GLOBAL_CONTEXT.lock();
        if let Some(context) = global.as_ref() {
            return Ok(Arc::clone(context));
        }
        let context = Arc::new(Self::from_config(&Config::default())?);
        *global = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Drops the process-wide instance. The next [`instance`](Self::instance)
    /// call rebuilds it.
    ///
    /// Queues are released once the last outstanding `Arc` is gone. Calling
    /// this when no instance exists does nothing.
    pub fn destroy_instance() {
        if GLOBAL_CONTEXT.lock().take().is_some() {
            tracing::debug!("Accelerator context instance destroyed");
        }
    }

    /// Returns the queue at `index`.
    ///
    /// An index outside `[0, device_count)` logs a warning and yields queue 0.
    /// Use [`try_queue`](Self::try_queue) to reject such indices instead.
    pub fn queue(&self, index: isize) -> Arc<dyn CommandQueue> {
        match self.try_queue(index) {
            Ok(queue) => queue,
            Err(_) => {
                tracing::warn!(
                    "Queue index {} out of range (0..{}), falling back to queue 0",
                    index,
                    self.queues.len()
                );
                Arc::clone(&self.queues[0])
            }
        }
    }

    /// Returns the queue at `index`, or `InvalidQueueIndex`.
    pub fn try_queue(&self, index: isize) -> Result<Arc<dyn CommandQueue>> {
        self.check_index(index)
            .map(|i| Arc::clone(&self.queues[i]))
    }

    /// Validates `index` against the device count.
    pub fn check_index(&self, index: isize) -> Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < self.queues.len())
            .ok_or(Error::InvalidQueueIndex {
                index,
                count: self.queues.len(),
            })
    }

    /// Number of devices, equal to the number of queues.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Device at `index`, if any.
    pub fn device(&self, index: usize) -> Option<&DeviceInfo> {
        self.devices.get(index)
    }

    /// All selected devices in queue order.
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Selected platform.
    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    /// Backend type the context was built with.
    pub fn accelerator_type(&self) -> AcceleratorType {
        self.accelerator_type
    }

    /// Counters summed over every queue.
    pub fn statistics(&self) -> HardwareStatistics {
        let mut total = HardwareStatistics::default();
        for queue in &self.queues {
            total.merge(&queue.statistics());
        }
        total
    }

    /// Blocks until every queue has drained.
    pub fn finish_all(&self) -> Result<()> {
        for queue in &self.queues {
            queue.finish()?;
        }
        Ok(())
    }
}

impl fmt::Debug for AcceleratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorContext")
            .field("accelerator_type", &self.accelerator_type)
            .field("platform", &self.platform.name)
            .field("devices", &self.devices.len())
            .finish()
    }
}

fn select_platform(mut platforms: Vec<PlatformInfo>, preferred: Option<&str>) -> PlatformInfo {
    if let Some(name) = preferred {
        let needle = name.to_lowercase();
        if let Some(pos) = platforms
            .iter()
            .position(|p| p.name.to_lowercase().contains(&needle))
        {
            return platforms.swap_remove(pos);
        }
        tracing::warn!(
            "No platform matching '{}', using '{}'",
            name,
            platforms[0].name
        );
    }
    platforms.swap_remove(0)
}

fn select_devices(
    backend: &dyn ComputeBackend,
    platform: &PlatformInfo,
    class: DeviceClass,
) -> Result<Vec<DeviceInfo>> {
    let devices = backend.devices(platform, class)?;
    if !devices.is_empty() {
        return Ok(devices);
    }

    let all = if class == DeviceClass::All {
        devices
    } else {
        tracing::warn!(
            "No {} devices on '{}', using every available device",
            class,
            platform.name
        );
        backend.devices(platform, DeviceClass::All)?
    };
    if all.is_empty() {
        return Err(Error::HardwareUnavailable(format!(
            "Platform '{}' has no devices",
            platform.name
        )));
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::hardware::HostBackend;

    fn host_config() -> Config {
        Config::new().with_backend(BackendKind::Host)
    }

    #[test]
    fn test_queue_index_fallback() {
        let backend = HostBackend::new(3);
        let context = AcceleratorContext::new(&backend, &host_config()).unwrap();
        assert_eq!(context.device_count(), 3);

        let first = context.queue(0);
        assert!(Arc::ptr_eq(&context.queue(-1), &first));
        assert!(Arc::ptr_eq(&context.queue(3), &first));
        assert!(!Arc::ptr_eq(&context.queue(2), &first));
        assert_eq!(context.queue(2).device().index, 2);
    }

    #[test]
    fn test_try_queue_rejects_out_of_range() {
        let backend = HostBackend::new(2);
        let context = AcceleratorContext::new(&backend, &host_config()).unwrap();
        assert!(context.try_queue(1).is_ok());
        assert!(matches!(
            context.try_queue(-1),
            Err(Error::InvalidQueueIndex { index: -1, count: 2 })
        ));
        assert!(context.try_queue(2).is_err());
    }

    #[test]
    fn test_platform_preference_and_fallback() {
        let backend = HostBackend::empty()
            .with_platform("Portable Runtime", &[DeviceClass::Cpu])
            .with_platform("Vendor GPU Platform", &[DeviceClass::Gpu, DeviceClass::Gpu]);

        let context = AcceleratorContext::new(
            &backend,
            &host_config().with_preferred_platform("vendor gpu"),
        )
        .unwrap();
        assert_eq!(context.platform().name, "Vendor GPU Platform");
        assert_eq!(context.device_count(), 2);

        let context = AcceleratorContext::new(
            &backend,
            &host_config().with_preferred_platform("missing"),
        )
        .unwrap();
        assert_eq!(context.platform().name, "Portable Runtime");
        // no GPU on the first platform, so every device is used
        assert_eq!(context.device_count(), 1);
        assert_eq!(context.devices()[0].class, DeviceClass::Cpu);
    }

    #[test]
    fn test_device_class_selection() {
        let backend = HostBackend::empty().with_platform(
            "Mixed",
            &[DeviceClass::Cpu, DeviceClass::Accelerator, DeviceClass::Gpu],
        );
        let context = AcceleratorContext::new(
            &backend,
            &host_config().with_device_class(DeviceClass::Accelerator),
        )
        .unwrap();
        assert_eq!(context.device_count(), 1);
        assert_eq!(context.device(0).unwrap().index, 1);
    }

    #[test]
    fn test_construction_failures() {
        let empty = HostBackend::empty();
        assert!(matches!(
            AcceleratorContext::new(&empty, &host_config()),
            Err(Error::HardwareUnavailable(_))
        ));

        let no_devices = HostBackend::empty().with_platform("Bare", &[]);
        assert!(matches!(
            AcceleratorContext::new(&no_devices, &host_config()),
            Err(Error::HardwareUnavailable(_))
        ));

        let backend = HostBackend::new(2);
        backend.faults().set_fail_queue_creation(true);
        assert!(matches!(
            AcceleratorContext::new(&backend, &host_config()),
            Err(Error::HardwareInitialization(_))
        ));
    }

    #[test]
    fn test_global_instance_lifecycle() {
        AcceleratorContext::destroy_instance();
        AcceleratorContext::destroy_instance();

        let config = host_config().with_emulated_devices(2);
        let context = AcceleratorContext::initialize_global(&config).unwrap();
        assert!(AcceleratorContext::initialize_global(&config).is_err());

        let again = AcceleratorContext::instance().unwrap();
        assert!(Arc::ptr_eq(&context, &again));
        assert_eq!(again.device_count(), 2);

        AcceleratorContext::destroy_instance();
        let rebuilt = AcceleratorContext::instance().unwrap();
        assert!(!Arc::ptr_eq(&context, &rebuilt));
        AcceleratorContext::destroy_instance();
    }
}
