// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The transient description of one hardware transfer.

use crate::framebuffer::Rotation;
use crate::layout::{MemoryLayout, Rect};
use crate::pixel_formats::{Conversion, PixelFormat};
use crate::sync::{SyncObject, SyncWaitPolicy};
use crate::transport::{DeviceAddress, DeviceRegion};
use std::borrow::Cow;
use std::sync::Arc;

/// Where one side of a transfer lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMemory<'a> {
    /// Application memory, read in place.
    Host(&'a [u8]),
    /// A repacked copy of application memory.
    Staging(Vec<u8>),
    Device(DeviceRegion),
}

impl TransferMemory<'_> {
    pub fn device_address(&self) -> Option<DeviceAddress> {
        match self {
            TransferMemory::Device(region) => Some(region.address()),
            TransferMemory::Host(_) | TransferMemory::Staging(_) => None,
        }
    }

    pub fn device_region(&self) -> Option<&DeviceRegion> {
        match self {
            TransferMemory::Device(region) => Some(region),
            TransferMemory::Host(_) | TransferMemory::Staging(_) => None,
        }
    }

    /**
    The first `len` bytes of this memory, as the CPU sees them.

    Host memory is borrowed; device memory is copied out of its mapping.  `None` if the memory is
    shorter than `len`.
    */
    pub fn read(&self, len: usize) -> Option<Cow<'_, [u8]>> {
        match self {
            TransferMemory::Host(bytes) => bytes.get(..len).map(Cow::Borrowed),
            TransferMemory::Staging(bytes) => bytes.get(..len).map(Cow::Borrowed),
            TransferMemory::Device(region) => {
                let offset = usize::try_from(region.offset).ok()?;
                region.memory().read(offset, len).map(Cow::Owned)
            }
        }
    }
}

/// One side of a transfer: an image in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSurface<'a> {
    pub memory: TransferMemory<'a>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub layout: MemoryLayout,
    /// Distance between chunk planes; zero for single-chunk formats.
    pub chunk_stride: u64,
    pub format: PixelFormat,
}

impl TransferSurface<'_> {
    /// Bytes from the start of the memory to the end of the last texel of `rect`.
    pub fn span_of(&self, rect: Rect) -> usize {
        if rect.is_empty() {
            return 0;
        }
        let bytes_per_texel = self.format.bytes_per_texel() as usize;
        (rect.y + rect.height - 1) as usize * self.stride as usize
            + (rect.x + rect.width) as usize * bytes_per_texel
    }
}

/// A prepared transfer, ready for [`crate::transfer::upload`] or [`crate::transfer::blit`].
#[derive(Debug, Clone)]
pub struct TransferDescriptor<'a> {
    pub src: TransferSurface<'a>,
    pub dst: TransferSurface<'a>,
    /// Region of the source in memory coordinates, after rotation remapping.
    pub src_rect: Rect,
    pub dst_rect: Rect,
    /// Sync objects to poll before a failed transfer is handed to software.
    pub wait: SyncWaitPolicy,
    /// How the source is walked to fill the destination.
    pub rotation: Rotation,
    pub conversion: Conversion,
    pub dst_sync: Arc<SyncObject>,
    pub src_sync: Option<Arc<SyncObject>>,
}
