//! # coherex
//!
//! coherex keeps logical data buffers coherent between host memory and
//! accelerator memory, and runs host-side fallback work on a growable pool of
//! OS threads.
//!
//! ## Features
//!
//! - Lazy, dirty-flag driven host/device synchronization with at most one copy per sync
//! - Platform/device discovery with configurable platform and device-class preference
//! - Host-emulated accelerator backend with transfer counters and fault injection
//! - OpenCL backend behind the `opencl` feature
//! - Growable worker pool with per-job waits, panic capture and bounded shutdown
//!
//! ## Modules
//!
//! - `config`: Configuration settings for the coherex system
//! - `error`: Error type shared by every module
//! - `hardware`: Accelerator abstraction, backends and the accelerator context
//! - `memory`: Host views and the device buffer cache
//! - `parallel`: Worker pool, work items and chunked parallel loops

#![allow(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

use std::sync::Arc;

// Re-export error types
pub use crate::error::{Error, Result};

// Modules
pub mod config;
pub mod error;
pub mod hardware;
pub mod memory;
pub mod parallel;
pub mod prelude {
    //! Prelude module that re-exports commonly used types and functions.

    pub use crate::config::{BackendKind, Config, DeviceClass};
    pub use crate::error::{Error, Result};
    pub use crate::hardware::{
        AcceleratorContext, AcceleratorType, CommandQueue, ComputeBackend, DeviceMemory,
        HardwareStatistics, HostBackend,
    };
    pub use crate::memory::{DeviceBufferCache, HostView};
    pub use crate::parallel::{
        JobHandle, MultiThreader, ParallelConfig, WorkItem, WorkerPool, WorkerState,
    };
    pub use crate::{CoherexRuntime, RuntimeStatistics};
}

/// Combined counters for the accelerator context and the worker pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeStatistics {
    /// Backend the context runs on
    pub backend: String,
    /// Selected platform name
    pub platform: String,
    /// Number of devices (and queues)
    pub devices: usize,
    /// Allocation and transfer counters summed over every queue
    pub hardware: hardware::HardwareStatistics,
    /// Worker pool counters
    pub parallel: parallel::ParallelStats,
    /// Worker threads currently tracked
    pub threads: usize,
}

/// An accelerator context and a worker pool with a shared lifecycle.
///
/// The runtime is the explicit alternative to the process-wide instances:
/// build one, hand out its context and pool, and shut it down when done.
#[derive(Debug)]
pub struct CoherexRuntime {
    config: config::Config,
    context: Arc<hardware::AcceleratorContext>,
    pool: Arc<parallel::WorkerPool>,
}

impl CoherexRuntime {
    /// Creates a runtime from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, no accelerator
    /// context can be built, or the initial worker threads cannot be spawned.
    pub fn new(config: config::Config) -> Result<Self> {
        config.validate()?;
        let context = Arc::new(hardware::AcceleratorContext::from_config(&config)?);
        Self::with_context(config, context)
    }

    /// Creates a runtime around an existing context.
    pub fn with_context(
        config: config::Config,
        context: Arc<hardware::AcceleratorContext>,
    ) -> Result<Self> {
        let pool = Arc::new(parallel::WorkerPool::new(config.parallel_config())?);
        Ok(Self {
            config,
            context,
            pool,
        })
    }

    /// Creates a buffer cache over `host`, bound to queue 0.
    pub fn create_buffer(&self, host: memory::HostView) -> Result<memory::DeviceBufferCache> {
        memory::DeviceBufferCache::from_host(Arc::clone(&self.context), host)
    }

    /// Creates a multi-threader on this runtime's pool.
    pub fn multi_threader(&self) -> parallel::MultiThreader {
        parallel::MultiThreader::new(
            Arc::clone(&self.pool),
            self.config.parallel_config().chunk_count,
        )
    }

    /// Returns the accelerator context.
    pub fn context(&self) -> &Arc<hardware::AcceleratorContext> {
        &self.context
    }

    /// Returns the worker pool.
    pub fn pool(&self) -> &Arc<parallel::WorkerPool> {
        &self.pool
    }

    /// Returns the configuration of the runtime.
    pub fn config(&self) -> &config::Config {
        &self.config
    }

    /// Returns the current statistics.
    pub fn statistics(&self) -> RuntimeStatistics {
        RuntimeStatistics {
            backend: self.context.accelerator_type().to_string(),
            platform: self.context.platform().name.clone(),
            devices: self.context.device_count(),
            hardware: self.context.statistics(),
            parallel: self.pool.stats(),
            threads: self.pool.thread_count(),
        }
    }

    /// Waits for queued device work, then shuts the pool down within the
    /// configured ceiling.
    pub fn shutdown(&self) -> Result<()> {
        self.context.finish_all()?;
        self.pool.destroy_pool(self.config.shutdown_ceiling())
    }
}
