//! Host-side buffers and host/device coherence.
//!
//! [`HostView`] is a shared, non-owning handle to caller-managed host memory.
//! [`DeviceBufferCache`] keeps one such host buffer coherent with a lazily
//! allocated device copy.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod buffer_cache;

pub use buffer_cache::DeviceBufferCache;

/// Shared handle to a host byte buffer.
///
/// Clones refer to the same bytes. A cache bound to a view reads and writes
/// through it but never frees or resizes it; the caller keeps its own clone
/// and decides when the memory goes away.
#[derive(Clone, Default)]
pub struct HostView {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl HostView {
    /// Wraps an existing byte vector.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Creates a zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// Copies a slice of plain-old-data values into a new buffer.
    pub fn from_pod<T: Pod>(values: &[T]) -> Self {
        Self::new(bytemuck::cast_slice(values).to_vec())
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the bytes for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read()
    }

    /// Locks the bytes for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes.write()
    }

    /// Copies the bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Sets every byte to `value`.
    pub fn fill(&self, value: u8) {
        self.bytes.write().iter_mut().for_each(|b| *b = value);
    }

    /// Whether two views share the same bytes.
    pub fn ptr_eq(&self, other: &HostView) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for HostView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostView").field("len", &self.len()).finish()
    }
}
