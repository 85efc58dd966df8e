// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Render surfaces: GPU-visible render targets registered with the kernel.

A [`RenderSurface`] is created by the completeness engine the first time a framebuffer's
attachments become usable, and shared by every attachable linked to it (a color texture level
and its companion depth and stencil buffers, possibly across several framebuffers).

The surface carries two counts.  The `Arc` count keeps the Rust object alive while anything can
still name it, for example a queued flush.  The *attachment* count is the number of framebuffer
attachment points that reach the surface through a linked attachable, and only
[`crate::lifecycle`] moves it: the surface is destroyed with the kernel when it reaches zero, even
if an `Arc` is still around.
*/

use crate::layout::MemoryLayout;
use crate::pixel_formats::PixelFormat;
use crate::sync::SyncObject;
use crate::transport::{DeviceAddress, KickFlags, SurfaceHandle, SurfaceParams};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of a surface within its sharegroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

pub struct RenderSurface {
    id: SurfaceId,
    handle: SurfaceHandle,
    params: SurfaceParams,
    sync: Arc<SyncObject>,
    sync_override: Mutex<Option<Arc<SyncObject>>>,
    attachment_refs: AtomicU32,
    in_frame: AtomicBool,
    primitives_since_flush: AtomicBool,
    destroyed: AtomicBool,
    /// Serializes scene state changes and kicks on this surface across contexts.  Never held
    /// together with another surface's lock.
    pub(crate) scene_lock: wasm_safe_mutex::Mutex<()>,
}

impl RenderSurface {
    /// Wraps a kernel surface.  The attachment count starts at zero; the creator links the
    /// first attachable.
    pub(crate) fn new(id: SurfaceId, handle: SurfaceHandle, params: SurfaceParams) -> Arc<Self> {
        Arc::new(RenderSurface {
            id,
            handle,
            params,
            sync: SyncObject::new(),
            sync_override: Mutex::new(None),
            attachment_refs: AtomicU32::new(0),
            in_frame: AtomicBool::new(false),
            primitives_since_flush: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            scene_lock: wasm_safe_mutex::Mutex::new(()),
        })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }
    pub fn handle(&self) -> SurfaceHandle {
        self.handle
    }
    pub fn params(&self) -> &SurfaceParams {
        &self.params
    }
    pub fn width(&self) -> u32 {
        self.params.width
    }
    pub fn height(&self) -> u32 {
        self.params.height
    }
    pub fn format(&self) -> PixelFormat {
        self.params.format
    }
    pub fn layout(&self) -> MemoryLayout {
        self.params.layout
    }
    /// Row stride in bytes.  Only meaningful for strided and tiled surfaces.
    pub fn stride(&self) -> u32 {
        self.params.stride
    }
    pub fn address(&self) -> DeviceAddress {
        self.params.address
    }

    /// The sync object hardware work on this surface is tracked against: the override when one
    /// is installed, otherwise the surface's own.
    pub fn sync(&self) -> Arc<SyncObject> {
        let guard = self.sync_override.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone().unwrap_or_else(|| self.sync.clone())
    }

    pub fn own_sync(&self) -> &Arc<SyncObject> {
        &self.sync
    }

    pub fn has_sync_override(&self) -> bool {
        self.sync_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn set_sync_override(&self, sync: Option<Arc<SyncObject>>) {
        *self.sync_override.lock().unwrap_or_else(PoisonError::into_inner) = sync;
    }

    /// Drops any override so the surface tracks work on its own sync object again.
    pub(crate) fn restore_sync(&self) {
        self.set_sync_override(None);
    }

    pub fn attachment_refs(&self) -> u32 {
        self.attachment_refs.load(Ordering::Acquire)
    }

    pub(crate) fn retain(&self, count: u32) {
        self.attachment_refs.fetch_add(count, Ordering::AcqRel);
    }

    /// Drops `count` attachment references and returns how many remain.
    pub(crate) fn release(&self, count: u32) -> u32 {
        let previous = self.attachment_refs.fetch_sub(count, Ordering::AcqRel);
        debug_assert!(previous >= count, "released more attachment references than were held");
        previous.saturating_sub(count)
    }

    /// Whether a hardware scene is open against this surface.
    pub fn in_frame(&self) -> bool {
        self.in_frame.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_frame(&self, in_frame: bool) {
        self.in_frame.store(in_frame, Ordering::Release);
    }

    pub fn has_primitives_since_flush(&self) -> bool {
        self.primitives_since_flush.load(Ordering::Acquire)
    }

    pub(crate) fn mark_primitives(&self) {
        self.primitives_since_flush.store(true, Ordering::Release);
    }

    /// Scene bookkeeping after a successful kick.
    pub(crate) fn kicked(&self, flags: KickFlags) {
        self.primitives_since_flush.store(false, Ordering::Release);
        if flags.closes_scene() {
            self.in_frame.store(false, Ordering::Release);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.in_frame.store(false, Ordering::Release);
    }

    /// Whether this surface can stand in for a newly computed set of parameters.
    pub(crate) fn matches(&self, params: &SurfaceParams) -> bool {
        !self.is_destroyed() && self.params == *params
    }
}

impl Debug for RenderSurface {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("params", &self.params)
            .field("attachment_refs", &self.attachment_refs())
            .field("in_frame", &self.in_frame())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> Arc<RenderSurface> {
        RenderSurface::new(
            SurfaceId(1),
            SurfaceHandle(7),
            SurfaceParams {
                width: 16,
                height: 16,
                format: PixelFormat::Rgba8888,
                layout: MemoryLayout::Strided,
                stride: 64,
                address: DeviceAddress(0x1000),
            },
        )
    }

    #[test]
    fn override_sync_takes_precedence() {
        let surface = surface();
        assert!(Arc::ptr_eq(&surface.sync(), surface.own_sync()));
        let shared = SyncObject::new();
        surface.set_sync_override(Some(shared.clone()));
        assert!(Arc::ptr_eq(&surface.sync(), &shared));
        surface.restore_sync();
        assert!(Arc::ptr_eq(&surface.sync(), surface.own_sync()));
    }

    #[test]
    fn kick_closes_scene_only_when_asked() {
        let surface = surface();
        surface.set_in_frame(true);
        surface.mark_primitives();
        surface.kicked(KickFlags::NONE);
        assert!(surface.in_frame());
        assert!(!surface.has_primitives_since_flush());
        surface.kicked(KickFlags::END_OF_SCENE);
        assert!(!surface.in_frame());
    }

    #[test]
    fn release_counts_down() {
        let surface = surface();
        surface.retain(1);
        surface.retain(2);
        assert_eq!(surface.release(2), 1);
        assert_eq!(surface.release(1), 0);
    }
}
