//! Configuration settings for the coherex system.
//!
//! This module defines the configuration options that control accelerator
//! selection (backend, platform, device class) and the behaviour of the host
//! worker pool (pre-spawned threads, shutdown polling and deadline).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::parallel::ParallelConfig;

/// Accelerator backend used to build the accelerator context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// OpenCL when compiled in and a platform exists, otherwise host emulation
    Auto,
    /// In-process emulated devices backed by host memory
    Host,
    /// OpenCL devices (requires the `opencl` feature)
    OpenCL,
}

/// Class of compute device requested from a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Graphics processors
    Gpu,
    /// Dedicated accelerators
    Accelerator,
    /// General-purpose processors
    Cpu,
    /// Any device the platform exposes
    All,
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceClass::Gpu => write!(f, "GPU"),
            DeviceClass::Accelerator => write!(f, "Accelerator"),
            DeviceClass::Cpu => write!(f, "CPU"),
            DeviceClass::All => write!(f, "All"),
        }
    }
}

/// Configuration settings for the coherex system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Accelerator backend
    backend: BackendKind,
    /// Preferred platform name (case-insensitive substring match)
    preferred_platform: Option<String>,
    /// Preferred device class
    device_class: DeviceClass,
    /// Number of devices exposed by the host-emulation backend
    emulated_devices: usize,
    /// Threads pre-spawned by a new worker pool (0 to grow on demand only)
    initial_threads: usize,
    /// Poll interval used while draining the pool at shutdown
    poll_interval_ms: u64,
    /// Default drain deadline for pool shutdown
    shutdown_ceiling_ms: u64,
    /// Verbose output flag
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            preferred_platform: None,
            device_class: DeviceClass::Gpu,
            emulated_devices: 1,
            initial_threads: 0,
            poll_interval_ms: 10,
            shutdown_ceiling_ms: 2000,
            verbose: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to a JSON file.
    pub fn save_json_file<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Sets the accelerator backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the preferred platform name.
    ///
    /// # Arguments
    ///
    /// * `name` - Substring matched case-insensitively against platform names
    ///
    /// # Returns
    ///
    /// Updated configuration with the new platform preference
    pub fn with_preferred_platform<S: Into<String>>(mut self, name: S) -> Self {
        self.preferred_platform = Some(name.into());
        self
    }

    /// Sets the preferred device class.
    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }

    /// Sets the number of emulated devices for the host backend.
    pub fn with_emulated_devices(mut self, emulated_devices: usize) -> Self {
        self.emulated_devices = emulated_devices;
        self
    }

    /// Sets the number of threads a new worker pool spawns up front.
    pub fn with_initial_threads(mut self, initial_threads: usize) -> Self {
        self.initial_threads = initial_threads;
        self
    }

    /// Sets the shutdown drain poll interval in milliseconds.
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Sets the default shutdown drain deadline in milliseconds.
    pub fn with_shutdown_ceiling_ms(mut self, shutdown_ceiling_ms: u64) -> Self {
        self.shutdown_ceiling_ms = shutdown_ceiling_ms;
        self
    }

    /// Sets the verbose output flag.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Returns the accelerator backend.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Returns the preferred platform name, if any.
    pub fn preferred_platform(&self) -> Option<&str> {
        self.preferred_platform.as_deref()
    }

    /// Returns the preferred device class.
    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    /// Returns the number of emulated devices.
    pub fn emulated_devices(&self) -> usize {
        self.emulated_devices
    }

    /// Returns the number of pre-spawned pool threads.
    pub fn initial_threads(&self) -> usize {
        self.initial_threads
    }

    /// Returns the shutdown poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the default shutdown drain deadline.
    pub fn shutdown_ceiling(&self) -> Duration {
        Duration::from_millis(self.shutdown_ceiling_ms)
    }

    /// Returns whether verbose output is enabled.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Builds the worker pool configuration.
    pub fn parallel_config(&self) -> ParallelConfig {
        ParallelConfig {
            initial_threads: self.initial_threads,
            poll_interval: self.poll_interval(),
            shutdown_ceiling: self.shutdown_ceiling(),
            ..ParallelConfig::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error if it's invalid
    pub fn validate(&self) -> crate::Result<()> {
        if self.emulated_devices == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "Emulated device count must be greater than zero".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "Poll interval must be greater than zero".to_string(),
            ));
        }

        if self.shutdown_ceiling_ms < self.poll_interval_ms {
            return Err(crate::Error::InvalidConfiguration(format!(
                "Shutdown ceiling ({} ms) cannot be shorter than the poll interval ({} ms)",
                self.shutdown_ceiling_ms, self.poll_interval_ms
            )));
        }

        if let Some(name) = &self.preferred_platform {
            if name.trim().is_empty() {
                return Err(crate::Error::InvalidConfiguration(
                    "Preferred platform name cannot be blank".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend(), BackendKind::Auto);
        assert_eq!(config.device_class(), DeviceClass::Gpu);
        assert!(config.preferred_platform().is_none());
        assert_eq!(config.emulated_devices(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_backend(BackendKind::Host)
            .with_preferred_platform("intel")
            .with_device_class(DeviceClass::Accelerator)
            .with_emulated_devices(3)
            .with_initial_threads(2)
            .with_poll_interval_ms(5)
            .with_shutdown_ceiling_ms(500)
            .with_verbose(true);

        assert_eq!(config.backend(), BackendKind::Host);
        assert_eq!(config.preferred_platform(), Some("intel"));
        assert_eq!(config.device_class(), DeviceClass::Accelerator);
        assert_eq!(config.emulated_devices(), 3);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert!(config.verbose());

        let parallel = config.parallel_config();
        assert_eq!(parallel.initial_threads, 2);
        assert_eq!(parallel.shutdown_ceiling, Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_zero_devices() {
        assert!(Config::new().with_emulated_devices(0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ceiling_below_interval() {
        let config = Config::new()
            .with_poll_interval_ms(50)
            .with_shutdown_ceiling_ms(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_missing_fields() {
        let config: Config =
            serde_json::from_str(r#"{ "preferred_platform": "AMD", "device_class": "Cpu" }"#)
                .unwrap();
        assert_eq!(config.preferred_platform(), Some("AMD"));
        assert_eq!(config.device_class(), DeviceClass::Cpu);
        assert_eq!(config.shutdown_ceiling(), Duration::from_millis(2000));
    }

    #[test]
    fn test_json_file_round_trip() {
        let path = std::env::temp_dir().join(format!("coherex-config-{}.json", std::process::id()));
        let config = Config::new().with_emulated_devices(4).with_initial_threads(1);
        config.save_json_file(&path).unwrap();

        let loaded = Config::from_json_file(&path).unwrap();
        assert_eq!(loaded.emulated_devices(), 4);
        assert_eq!(loaded.initial_threads(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
