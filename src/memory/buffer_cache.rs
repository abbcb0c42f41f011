//! Lazily synchronized host/device buffer.
//!
//! A [`DeviceBufferCache`] tracks which of its two copies is stale with a pair
//! of dirty flags:
//!
//! * `host_dirty`: the host copy is stale, the device copy is authoritative
//! * `device_dirty`: the device copy is stale, the host copy is authoritative
//!
//! Copies happen only when a side is asked to become current while it is
//! marked stale. The two flags are never both set by the paired
//! `mark_*_stale` calls; [`DeviceBufferCache::synchronize`] reports the
//! combination as a [`CoherenceViolation`](crate::Error::CoherenceViolation)
//! rather than picking a side.
//!
//! Every operation runs under one lock per cache, so a flag check, the copy it
//! triggers and the flag update are never interleaved with another caller.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::hardware::{AcceleratorContext, CommandQueue, DeviceMemory};
use crate::memory::HostView;

#[derive(Debug)]
struct CacheState {
    byte_size: usize,
    host: Option<HostView>,
    device: Option<DeviceMemory>,
    host_dirty: bool,
    device_dirty: bool,
    queue_index: usize,
}

impl CacheState {
    fn queue(&self, context: &AcceleratorContext) -> Arc<dyn CommandQueue> {
        context.queue(self.queue_index as isize)
    }

    fn ensure_host_current(&mut self, context: &AcceleratorContext) -> Result<()> {
        if !self.host_dirty {
            return Ok(());
        }
        let (Some(device), Some(host)) = (self.device.as_ref(), self.host.as_ref()) else {
            return Ok(());
        };

        let queue = self.queue(context);
        let mut bytes = host.write();
        if bytes.len() < device.len() {
            return Err(Error::HostBufferTooSmall {
                needed: device.len(),
                available: bytes.len(),
            });
        }
        queue.read_blocking(device, &mut bytes[..device.len()])?;
        drop(bytes);

        tracing::trace!(
            "Downloaded {} bytes from device {}",
            self.byte_size,
            self.queue_index
        );
        self.host_dirty = false;
        Ok(())
    }

    // Device writes must reach the host before the device copy is given up.
    fn flush_to_host(&mut self, context: &AcceleratorContext) -> Result<()> {
        if self.host_dirty && self.device.is_some() && self.host.is_none() {
            return Err(Error::InvalidState(format!(
                "Device holds the only current copy of a {}-byte buffer and no host view is attached",
                self.byte_size
            )));
        }
        self.ensure_host_current(context)?;
        self.host_dirty = false;
        Ok(())
    }

    fn ensure_device_current(&mut self, context: &AcceleratorContext) -> Result<()> {
        if !self.device_dirty || self.byte_size == 0 {
            return Ok(());
        }
        let Some(host) = self.host.as_ref() else {
            return Ok(());
        };

        let queue = self.queue(context);
        let bytes = host.read();
        if bytes.len() < self.byte_size {
            return Err(Error::HostBufferTooSmall {
                needed: self.byte_size,
                available: bytes.len(),
            });
        }
        if self.device.is_none() {
            self.device = Some(DeviceMemory::allocate(&queue, self.byte_size)?);
        }
        if let Some(device) = self.device.as_mut() {
            queue.write_blocking(device, &bytes[..self.byte_size])?;
        }
        drop(bytes);

        tracing::trace!(
            "Uploaded {} bytes to device {}",
            self.byte_size,
            self.queue_index
        );
        self.device_dirty = false;
        Ok(())
    }
}

/// One logical buffer kept coherent between host memory and a device.
///
/// The cache owns its device allocation and releases it on drop. It never owns
/// the host bytes: the attached [`HostView`] is shared with the caller.
pub struct DeviceBufferCache {
    context: Arc<AcceleratorContext>,
    state: Mutex<CacheState>,
}

impl DeviceBufferCache {
    /// Creates an empty cache bound to queue 0 of `context`.
    pub fn new(context: Arc<AcceleratorContext>) -> Self {
        Self {
            context,
            state: Mutex::new(CacheState {
                byte_size: 0,
                host: None,
                device: None,
                host_dirty: false,
                device_dirty: false,
                queue_index: 0,
            }),
        }
    }

    /// Creates an empty cache bound to queue `index`.
    pub fn with_queue(context: Arc<AcceleratorContext>, index: isize) -> Result<Self> {
        let queue_index = context.check_index(index)?;
        let cache = Self::new(context);
        cache.state.lock().queue_index = queue_index;
        Ok(cache)
    }

    /// Creates a cache over `host`, sized to the whole view.
    pub fn from_host(context: Arc<AcceleratorContext>, host: HostView) -> Result<Self> {
        let cache = Self::new(context);
        cache.set_size(host.len())?;
        cache.set_host_view(Some(host));
        Ok(cache)
    }

    /// Records the buffer size in bytes. Does not allocate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once device memory exists; a live allocation is
    /// never resized.
    pub fn set_size(&self, byte_size: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.device.is_some() && byte_size != state.byte_size {
            return Err(Error::InvalidState(format!(
                "Cannot resize a {}-byte buffer to {} bytes after device allocation",
                state.byte_size, byte_size
            )));
        }
        state.byte_size = byte_size;
        Ok(())
    }

    /// Attaches (or detaches, with `None`) the host buffer. Nothing is copied.
    pub fn set_host_view(&self, host: Option<HostView>) {
        self.state.lock().host = host;
    }

    /// Returns a clone of the attached host view.
    pub fn host_view(&self) -> Option<HostView> {
        self.state.lock().host.clone()
    }

    /// Allocates device memory and uploads the host content.
    ///
    /// Does nothing when the size is zero or device memory already exists.
    pub fn allocate_device(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.byte_size == 0 || state.device.is_some() {
            return Ok(());
        }

        let queue = state.queue(&self.context);
        state.device = Some(DeviceMemory::allocate(&queue, state.byte_size)?);
        state.host_dirty = false;
        state.device_dirty = true;
        state.ensure_device_current(&self.context)
    }

    /// Flushes pending device writes to the host, then marks the device copy stale.
    ///
    /// Call before mutating the host copy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState`, changing nothing, when the device holds the only
    /// current copy and no host view is attached to receive it.
    pub fn mark_device_stale(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.flush_to_host(&self.context)?;
        state.device_dirty = true;
        Ok(())
    }

    /// Flushes pending host writes to the device, then marks the host copy stale.
    ///
    /// Call before mutating the device copy.
    pub fn mark_host_stale(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_device_current(&self.context)?;
        state.device_dirty = false;
        state.host_dirty = true;
        Ok(())
    }

    /// Copies device → host if the host copy is stale.
    ///
    /// No-op without device memory or a host view.
    pub fn ensure_host_current(&self) -> Result<()> {
        self.state.lock().ensure_host_current(&self.context)
    }

    /// Copies host → device if the device copy is stale, allocating on first use.
    ///
    /// No-op without a host view or with a zero size.
    pub fn ensure_device_current(&self) -> Result<()> {
        self.state.lock().ensure_device_current(&self.context)
    }

    /// Brings both copies up to date and clears both dirty flags.
    ///
    /// # Errors
    ///
    /// Returns `CoherenceViolation`, leaving the flags untouched, when both
    /// copies are marked stale.
    pub fn synchronize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.host_dirty && state.device_dirty {
            tracing::error!(
                "Host and device copies of a {}-byte buffer are both dirty",
                state.byte_size
            );
            return Err(Error::CoherenceViolation {
                byte_size: state.byte_size,
            });
        }

        state.ensure_device_current(&self.context)?;
        state.ensure_host_current(&self.context)?;
        state.host_dirty = false;
        state.device_dirty = false;
        Ok(())
    }

    /// Moves the buffer to queue `index`.
    ///
    /// Pending device writes are flushed to the host first and the device copy
    /// is marked stale under the new queue. An allocation that is not usable
    /// from the new queue's context is released and reallocated on the next
    /// upload.
    ///
    /// # Errors
    ///
    /// An out-of-range index logs a warning, changes nothing and returns
    /// `InvalidQueueIndex`. Returns `InvalidState`, also changing nothing, when
    /// pending device writes have no host view to land in.
    pub fn rebind_queue(&self, index: isize) -> Result<()> {
        let new_index = match self.context.check_index(index) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!("Ignoring rebind to invalid queue index {}", index);
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        state.flush_to_host(&self.context)?;
        state.queue_index = new_index;

        let queue = state.queue(&self.context);
        if state.device.as_ref().is_some_and(|d| !d.usable_on(&queue)) {
            tracing::debug!(
                "Releasing device allocation not shared with queue {}",
                new_index
            );
            state.device = None;
        }
        state.device_dirty = true;
        Ok(())
    }

    /// Sets the host-dirty flag without synchronizing.
    pub fn set_host_dirty(&self, dirty: bool) {
        self.state.lock().host_dirty = dirty;
    }

    /// Sets the device-dirty flag without synchronizing.
    pub fn set_device_dirty(&self, dirty: bool) {
        self.state.lock().device_dirty = dirty;
    }

    /// Whether the host copy is stale.
    pub fn is_host_dirty(&self) -> bool {
        self.state.lock().host_dirty
    }

    /// Whether the device copy is stale.
    pub fn is_device_dirty(&self) -> bool {
        self.state.lock().device_dirty
    }

    /// Buffer size in bytes.
    pub fn byte_size(&self) -> usize {
        self.state.lock().byte_size
    }

    /// Index of the bound queue.
    pub fn queue_index(&self) -> usize {
        self.state.lock().queue_index
    }

    /// Whether device memory is allocated.
    pub fn has_device_memory(&self) -> bool {
        self.state.lock().device.is_some()
    }

    /// Context this cache allocates from.
    pub fn context(&self) -> &Arc<AcceleratorContext> {
        &self.context
    }

    /// Runs `f` on the host bytes after making them current.
    ///
    /// Returns `None` when no host view is attached.
    pub fn read_host<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<Option<R>> {
        let mut state = self.state.lock();
        state.ensure_host_current(&self.context)?;
        Ok(state.host.as_ref().map(|host| f(&host.read())))
    }

    /// Runs `f` on the host bytes for mutation, then marks the device copy stale.
    ///
    /// Returns `None` when no host view is attached.
    pub fn write_host<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<Option<R>> {
        let mut state = self.state.lock();
        state.ensure_host_current(&self.context)?;
        let Some(host) = state.host.clone() else {
            return Ok(None);
        };
        let result = f(&mut host.write());
        state.host_dirty = false;
        state.device_dirty = true;
        Ok(Some(result))
    }

    /// Runs `f` against the device allocation after making it current, then
    /// marks the host copy stale.
    ///
    /// Returns `None` when there is no device memory to hand out (zero size or
    /// no host view to upload from).
    pub fn with_device<R>(
        &self,
        f: impl FnOnce(&Arc<dyn CommandQueue>, &mut DeviceMemory) -> Result<R>,
    ) -> Result<Option<R>> {
        let mut state = self.state.lock();
        state.ensure_device_current(&self.context)?;
        let queue = state.queue(&self.context);
        let Some(device) = state.device.as_mut() else {
            return Ok(None);
        };
        let result = f(&queue, device)?;
        state.device_dirty = false;
        state.host_dirty = true;
        Ok(Some(result))
    }
}

impl fmt::Debug for DeviceBufferCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeviceBufferCache")
            .field("byte_size", &state.byte_size)
            .field("queue_index", &state.queue_index)
            .field("host_dirty", &state.host_dirty)
            .field("device_dirty", &state.device_dirty)
            .field("device", &state.device)
            .finish()
    }
}
