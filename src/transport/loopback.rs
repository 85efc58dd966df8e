// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
An in-process [`Transport`].

Memory is plain host memory, render targets are entries in a table and transfers are copied
on the CPU at submission.  Their completion is signalled immediately or when
[`LoopbackTransport::retire_all`] is called.  Failures can be injected so the software
fallback and rollback paths can be driven deterministically.
*/

use super::{
    DeviceAddress, DeviceAllocation, DeviceMemory, KickFlags, SurfaceHandle, SurfaceParams,
    Transport, TransportError,
};
use crate::bittricks::align_up_u64;
use crate::framebuffer::Rotation;
use crate::layout::Rect;
use crate::pixel_formats::Conversion;
use crate::sync::{AccessKind, SyncObject, SyncStatus};
use crate::transfer::TransferDescriptor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const BASE_ADDRESS: u64 = 0x1000_0000;
const ALLOCATION_ALIGNMENT: u64 = 4096;

/// What the loopback saw of one accepted transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub src_rect: Rect,
    pub dst_rect: Rect,
    pub dst_address: Option<DeviceAddress>,
    pub rotation: Rotation,
    pub conversion: Conversion,
}

#[derive(Debug, Default)]
struct LoopbackState {
    next_address: u64,
    next_handle: u64,
    live_bytes: u64,
    budget: Option<u64>,
    surfaces: HashMap<SurfaceHandle, SurfaceParams>,
    destroyed: Vec<SurfaceHandle>,
    kicks: Vec<(SurfaceHandle, KickFlags)>,
    transfers: Vec<TransferRecord>,
    fail_submissions: u32,
    fail_kicks: u32,
    defer_completion: bool,
    in_flight: Vec<(Arc<SyncObject>, AccessKind)>,
}

#[derive(Debug)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            state: Mutex::new(LoopbackState {
                next_address: BASE_ADDRESS,
                next_handle: 1,
                ..LoopbackState::default()
            }),
        }
    }

    /// A transport that refuses allocations once `bytes` are live.
    pub fn with_memory_budget(bytes: u64) -> Self {
        let transport = Self::new();
        transport.lock().budget = Some(bytes);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` transfer submissions fail.
    pub fn fail_next_submissions(&self, count: u32) {
        self.lock().fail_submissions = count;
    }

    /// Makes the next `count` scene kicks fail.
    pub fn fail_next_kicks(&self, count: u32) {
        self.lock().fail_kicks = count;
    }

    /// When set, transfers stay in flight until [`Self::retire_all`].
    pub fn defer_completion(&self, defer: bool) {
        self.lock().defer_completion = defer;
    }

    /// Completes every in-flight transfer.
    pub fn retire_all(&self) {
        let in_flight = std::mem::take(&mut self.lock().in_flight);
        for (sync, access) in in_flight {
            sync.retire(access);
        }
    }

    pub fn live_surface_count(&self) -> usize {
        self.lock().surfaces.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.lock().live_bytes
    }

    pub fn destroyed_surfaces(&self) -> Vec<SurfaceHandle> {
        self.lock().destroyed.clone()
    }

    pub fn kicks(&self) -> Vec<(SurfaceHandle, KickFlags)> {
        self.lock().kicks.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.lock().transfers.clone()
    }

    pub fn surface_params(&self, handle: SurfaceHandle) -> Option<SurfaceParams> {
        self.lock().surfaces.get(&handle).cloned()
    }
}

impl Transport for LoopbackTransport {
    fn allocate(&self, bytes: u64, label: &str) -> Result<DeviceAllocation, TransportError> {
        let mut state = self.lock();
        if let Some(budget) = state.budget {
            if state.live_bytes + bytes > budget {
                logwise::warn_sync!(
                    "loopback allocation of {bytes} bytes for {label} exceeds budget",
                    bytes = bytes,
                    label = logwise::privacy::LogIt(&label)
                );
                return Err(TransportError::OutOfMemory { bytes });
            }
        }
        let size = usize::try_from(bytes).map_err(|_| TransportError::OutOfMemory { bytes })?;
        let address = DeviceAddress(state.next_address);
        state.next_address = align_up_u64(state.next_address + bytes.max(1), ALLOCATION_ALIGNMENT);
        state.live_bytes += bytes;
        Ok(DeviceAllocation {
            address,
            size: bytes,
            memory: Arc::new(DeviceMemory::zeroed(size)),
        })
    }

    fn free(&self, allocation: DeviceAllocation) {
        let mut state = self.lock();
        state.live_bytes = state.live_bytes.saturating_sub(allocation.size);
    }

    fn create_render_surface(&self, params: &SurfaceParams) -> Result<SurfaceHandle, TransportError> {
        let mut state = self.lock();
        let handle = SurfaceHandle(state.next_handle);
        state.next_handle += 1;
        state.surfaces.insert(handle, params.clone());
        Ok(handle)
    }

    fn destroy_surface(&self, handle: SurfaceHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        match state.surfaces.remove(&handle) {
            Some(_) => {
                state.destroyed.push(handle);
                Ok(())
            }
            None => Err(TransportError::UnknownSurface(handle)),
        }
    }

    fn kick(&self, handle: SurfaceHandle, flags: KickFlags) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.surfaces.contains_key(&handle) {
            return Err(TransportError::UnknownSurface(handle));
        }
        if state.fail_kicks > 0 {
            state.fail_kicks -= 1;
            return Err(TransportError::KickFailed);
        }
        state.kicks.push((handle, flags));
        Ok(())
    }

    fn submit_transfer(&self, descriptor: &TransferDescriptor<'_>) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_submissions > 0 {
            state.fail_submissions -= 1;
            return Err(TransportError::SubmissionRejected);
        }
        copy_pixels(descriptor)?;
        state.transfers.push(TransferRecord {
            src_rect: descriptor.src_rect,
            dst_rect: descriptor.dst_rect,
            dst_address: descriptor.dst.memory.device_address(),
            rotation: descriptor.rotation,
            conversion: descriptor.conversion,
        });
        let mut retire = vec![(descriptor.dst_sync.clone(), AccessKind::Write)];
        if let Some(src_sync) = &descriptor.src_sync {
            retire.push((src_sync.clone(), AccessKind::Read));
        }
        if state.defer_completion {
            state.in_flight.extend(retire);
        } else {
            drop(state);
            for (sync, access) in retire {
                sync.retire(access);
            }
        }
        Ok(())
    }

    fn query_transfer_complete(&self, sync: &SyncObject, _wait: bool) -> SyncStatus {
        if sync.is_idle() {
            SyncStatus::Complete
        } else {
            SyncStatus::Pending
        }
    }
}

/// Performs a transfer on the CPU.  Every layout is stored row-major at its stride.
fn copy_pixels(descriptor: &TransferDescriptor<'_>) -> Result<(), TransportError> {
    let bytes_per_texel = descriptor.dst.format.bytes_per_texel() as usize;
    let src = descriptor
        .src
        .memory
        .read(descriptor.src.span_of(descriptor.src_rect))
        .ok_or(TransportError::SubmissionRejected)?;
    let Some(dst_region) = descriptor.dst.memory.device_region() else {
        return Err(TransportError::SubmissionRejected);
    };
    let dst_offset = usize::try_from(dst_region.offset).map_err(|_| TransportError::SubmissionRejected)?;
    let src_stride = descriptor.src.stride as usize;
    let dst_stride = descriptor.dst.stride as usize;
    let mut memory = dst_region.memory().lock();
    for j in 0..descriptor.dst_rect.height {
        for i in 0..descriptor.dst_rect.width {
            let (sx, sy) = descriptor.rotation.source_texel(descriptor.src_rect, i, j);
            let from = sy as usize * src_stride + sx as usize * bytes_per_texel;
            let to = dst_offset
                + (descriptor.dst_rect.y + j) as usize * dst_stride
                + (descriptor.dst_rect.x + i) as usize * bytes_per_texel;
            let (Some(texel), Some(out)) = (
                src.get(from..from + bytes_per_texel),
                memory.get_mut(to..to + bytes_per_texel),
            ) else {
                return Err(TransportError::SubmissionRejected);
            };
            out.copy_from_slice(texel);
            descriptor.conversion.apply(out);
        }
    }
    Ok(())
}
