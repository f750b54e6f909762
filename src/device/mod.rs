//! # Device memory accounting
//!
//! The ensemble's total weight footprint exceeds what the accelerator can
//! hold, so models are loaded one at a time and every byte is accounted
//! for. `Device` tracks usage against a fixed capacity; a `MemoryLease`
//! returns its bytes on drop, which guarantees release on every exit path,
//! including failures mid-inference.
//!
//! The device also carries the global execution lock: every
//! load -> infer -> release bracket runs under it, so concurrent requests
//! queue instead of racing for memory.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::EngineError;

/// Fixed-capacity accountant for accelerator memory.
pub struct Device {
    /// Hard ceiling in bytes
    capacity: usize,
    /// Bytes currently leased
    in_use: Mutex<usize>,
    /// Serializes load -> infer -> release brackets across callers
    exec: Mutex<()>,
}

impl Device {
    /// Creates a device accountant with the given byte capacity.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_use: Mutex::new(0),
            exec: Mutex::new(()),
        })
    }

    /// Acquires the execution lock. The caller holds exclusive access to
    /// the device until the guard is dropped; pending callers block.
    pub fn begin_exclusive(&self) -> MutexGuard<'_, ()> {
        match self.exec.lock() {
            Ok(guard) => guard,
            // A poisoned lock only means another bracket panicked; the
            // accountant itself is still consistent because leases release
            // through Drop.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Leases `bytes` of device memory.
    ///
    /// # Errors
    ///
    /// `EngineError::InsufficientDeviceMemory` when the request would
    /// exceed the remaining capacity. Nothing is reserved on failure.
    pub fn lease(self: &Arc<Self>, bytes: usize) -> Result<MemoryLease, EngineError> {
        let mut in_use = self.lock_in_use();
        let available = self.capacity - *in_use;
        if bytes > available {
            return Err(EngineError::InsufficientDeviceMemory {
                requested: bytes,
                available,
            });
        }
        *in_use += bytes;
        debug!(bytes, in_use = *in_use, capacity = self.capacity, "leased device memory");
        Ok(MemoryLease {
            device: Arc::clone(self),
            bytes,
        })
    }

    /// Bytes currently leased. Zero between calls is the resource
    /// invariant the engine is tested against.
    pub fn in_use(&self) -> usize {
        *self.lock_in_use()
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_in_use(&self) -> MutexGuard<'_, usize> {
        match self.in_use.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A scoped reservation of device memory.
///
/// Dropping the lease returns its bytes immediately; the next load must
/// never wait on deferred reclamation.
pub struct MemoryLease {
    device: Arc<Device>,
    bytes: usize,
}

impl MemoryLease {
    /// Size of this reservation in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        let mut in_use = self.device.lock_in_use();
        *in_use -= self.bytes;
        debug!(bytes = self.bytes, in_use = *in_use, "released device memory");
    }
}
