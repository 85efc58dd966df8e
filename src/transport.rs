// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The seam to the kernel-mode driver.
//!
//! Everything that actually reaches the hardware (allocating device memory, registering render
//! targets, kicking scenes, submitting transfers, querying completion) goes through the
//! [`Transport`] trait.  A platform integration implements it over its kernel interface;
//! [`loopback::LoopbackTransport`] implements it in process for tests and for hosts without a
//! kernel driver.

pub mod loopback;

use crate::layout::MemoryLayout;
use crate::pixel_formats::PixelFormat;
use crate::sync::{AccessKind, SyncModifier, SyncObject, SyncStatus};
use crate::transfer::TransferDescriptor;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A GPU-visible address.  Device memory in this driver is also CPU mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub u64);

impl DeviceAddress {
    pub const fn offset(self, bytes: u64) -> DeviceAddress {
        DeviceAddress(self.0 + bytes)
    }
}

/// The CPU mapping of a device allocation.
pub struct DeviceMemory {
    bytes: Mutex<Box<[u8]>>,
}

impl DeviceMemory {
    pub fn zeroed(size: usize) -> Self {
        DeviceMemory {
            bytes: Mutex::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the mapping for CPU access.
    pub fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `len` bytes starting at `offset` out of the mapping.
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let bytes = self.lock();
        bytes.get(offset..offset.checked_add(len)?).map(<[u8]>::to_vec)
    }
}

impl Debug for DeviceMemory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemory").field("len", &self.len()).finish()
    }
}

/// A block of device memory handed out by [`Transport::allocate`].
#[derive(Debug, Clone)]
pub struct DeviceAllocation {
    pub address: DeviceAddress,
    pub size: u64,
    pub memory: Arc<DeviceMemory>,
}

impl PartialEq for DeviceAllocation {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && Arc::ptr_eq(&self.memory, &other.memory)
    }
}
impl Eq for DeviceAllocation {}

/// A byte offset into a device allocation, such as one mip level of a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegion {
    pub allocation: DeviceAllocation,
    pub offset: u64,
}

impl DeviceRegion {
    pub fn address(&self) -> DeviceAddress {
        self.allocation.address.offset(self.offset)
    }

    pub fn memory(&self) -> &Arc<DeviceMemory> {
        &self.allocation.memory
    }
}

/// Kernel-side handle of a registered render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// What the kernel needs to register a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceParams {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub layout: MemoryLayout,
    pub stride: u32,
    pub address: DeviceAddress,
}

/// Scene kick options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KickFlags {
    /// Close the scene; the next draw starts a new one.
    pub end_of_scene: bool,
    /// Throw the scene's contents away instead of resolving them.
    pub discard: bool,
}

impl KickFlags {
    pub const NONE: KickFlags = KickFlags {
        end_of_scene: false,
        discard: false,
    };
    pub const END_OF_SCENE: KickFlags = KickFlags {
        end_of_scene: true,
        discard: false,
    };
    pub const DISCARD: KickFlags = KickFlags {
        end_of_scene: false,
        discard: true,
    };

    /// Whether the kick leaves no scene open.
    pub const fn closes_scene(self) -> bool {
        self.end_of_scene || self.discard
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("out of device memory ({bytes} bytes requested)")]
    OutOfMemory { bytes: u64 },
    #[error("the kernel rejected the submission")]
    SubmissionRejected,
    #[error("scene kick failed")]
    KickFailed,
    #[error("unknown surface handle {0:?}")]
    UnknownSurface(SurfaceHandle),
    #[error("device lost")]
    DeviceLost,
}

/**
Kernel and hardware services consumed by the driver core.

Implementations are shared by every context in a sharegroup and called from arbitrary threads.
*/
pub trait Transport: Send + Sync + Debug {
    /// Allocates `bytes` of zeroed, CPU-mapped device memory.
    fn allocate(&self, bytes: u64, label: &str) -> Result<DeviceAllocation, TransportError>;

    fn free(&self, allocation: DeviceAllocation);

    /// Registers a render target over already-allocated memory.
    fn create_render_surface(&self, params: &SurfaceParams) -> Result<SurfaceHandle, TransportError>;

    fn destroy_surface(&self, handle: SurfaceHandle) -> Result<(), TransportError>;

    /// Sends the surface's queued rendering to the hardware.
    fn kick(&self, handle: SurfaceHandle, flags: KickFlags) -> Result<(), TransportError>;

    /// Queues a transfer on the hardware transfer engine.
    fn submit_transfer(&self, descriptor: &TransferDescriptor<'_>) -> Result<(), TransportError>;

    /// Reports whether every operation queued against `sync` has completed.
    ///
    /// `wait` hints that the caller is about to spin on the answer; implementations may use it
    /// to flush pending completions but must not block.
    fn query_transfer_complete(&self, sync: &SyncObject, wait: bool) -> SyncStatus;

    /// Reserves one pending operation on `sync` ahead of a submission.
    fn create_sync_modifier(
        &self,
        sync: &Arc<SyncObject>,
        access: AccessKind,
    ) -> Result<SyncModifier, TransportError> {
        Ok(SyncModifier::reserve(sync, access))
    }

    fn destroy_sync_modifier(&self, modifier: SyncModifier) {
        modifier.release();
    }
}
