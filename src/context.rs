// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Rendering contexts and the sharegroup they belong to.

A [`ShareGroup`] is the unit of sharing: every context in it sees the same textures,
renderbuffers and framebuffers, talks to the same [`Transport`] and shares one pending-flush
queue.  A [`Context`] is one command stream, used from one thread at a time.
*/

use crate::config::DriverConfig;
use crate::surface::{RenderSurface, SurfaceId};
use crate::transfer::{PixelCodec, RowCopyCodec};
use crate::transport::{KickFlags, Transport};
use std::collections::{HashSet, VecDeque};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of a context within its sharegroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

/// A flush a context deferred.  Only the context that queued it may remove it.
#[derive(Debug, Clone)]
pub struct PendingFlush {
    pub context: ContextId,
    pub surface: Arc<RenderSurface>,
    pub flags: KickFlags,
}

/// Counters describing which path transfers took.
#[derive(Debug, Default)]
pub struct TransferStats {
    hardware_uploads: AtomicU64,
    hardware_blits: AtomicU64,
    rejected: AtomicU64,
    submission_failures: AtomicU64,
    software_uploads: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransferCounts {
    pub hardware_uploads: u64,
    pub hardware_blits: u64,
    pub rejected: u64,
    pub submission_failures: u64,
    pub software_uploads: u64,
}

impl TransferStats {
    pub(crate) fn hardware_upload(&self) {
        self.hardware_uploads.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn hardware_blit(&self) {
        self.hardware_blits.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn submission_failure(&self) {
        self.submission_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn software_upload(&self) {
        self.software_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferCounts {
        TransferCounts {
            hardware_uploads: self.hardware_uploads.load(Ordering::Relaxed),
            hardware_blits: self.hardware_blits.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            submission_failures: self.submission_failures.load(Ordering::Relaxed),
            software_uploads: self.software_uploads.load(Ordering::Relaxed),
        }
    }
}

pub struct ShareGroup {
    transport: Arc<dyn Transport>,
    pub(crate) pending_flushes: wasm_safe_mutex::Mutex<VecDeque<PendingFlush>>,
    surfaces: Mutex<HashSet<SurfaceId>>,
    stats: TransferStats,
    next_context: AtomicU64,
    next_surface: AtomicU64,
}

impl ShareGroup {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(ShareGroup {
            transport,
            pending_flushes: wasm_safe_mutex::Mutex::new(VecDeque::new()),
            surfaces: Mutex::new(HashSet::new()),
            stats: TransferStats::default(),
            next_context: AtomicU64::new(1),
            next_surface: AtomicU64::new(1),
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub(crate) fn next_surface_id(&self) -> SurfaceId {
        SurfaceId(self.next_surface.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn track_surface(&self, id: SurfaceId) {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    pub(crate) fn untrack_surface(&self, id: SurfaceId) -> bool {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn is_tracked(&self, id: SurfaceId) -> bool {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    pub fn live_surface_count(&self) -> usize {
        self.surfaces.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of the pending-flush queue, oldest first.
    pub fn pending_flushes(&self) -> Vec<PendingFlush> {
        self.pending_flushes.lock_sync().iter().cloned().collect()
    }
}

impl Debug for ShareGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareGroup")
            .field("transport", &self.transport)
            .field("live_surfaces", &self.live_surface_count())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

pub struct Context {
    id: ContextId,
    share_group: Arc<ShareGroup>,
    config: DriverConfig,
    codec: Arc<dyn PixelCodec>,
    active_surface: Mutex<Option<Arc<RenderSurface>>>,
}

impl Context {
    pub fn new(share_group: &Arc<ShareGroup>, config: DriverConfig) -> Self {
        Self::with_codec(share_group, config, Arc::new(RowCopyCodec))
    }

    /// A context whose software paths convert pixels with `codec`.
    pub fn with_codec(share_group: &Arc<ShareGroup>, config: DriverConfig, codec: Arc<dyn PixelCodec>) -> Self {
        let id = ContextId(share_group.next_context.fetch_add(1, Ordering::Relaxed));
        logwise::debuginternal_sync!("context {id} created", id = id.0);
        Context {
            id,
            share_group: share_group.clone(),
            config,
            codec,
            active_surface: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }
    pub fn share_group(&self) -> &Arc<ShareGroup> {
        &self.share_group
    }
    pub fn transport(&self) -> &dyn Transport {
        self.share_group.transport.as_ref()
    }
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
    pub fn codec(&self) -> &dyn PixelCodec {
        self.codec.as_ref()
    }

    /// The surface this context is currently rendering into.
    pub fn active_surface(&self) -> Option<Arc<RenderSurface>> {
        self.active_surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self, surface: &Arc<RenderSurface>) -> bool {
        self.active_surface()
            .is_some_and(|active| Arc::ptr_eq(&active, surface))
    }

    /// Makes `surface` the render target and opens a scene against it.
    pub fn begin_scene(&self, surface: &Arc<RenderSurface>) {
        let _scene = surface.scene_lock.lock_sync();
        surface.set_in_frame(true);
        *self.active_surface.lock().unwrap_or_else(PoisonError::into_inner) = Some(surface.clone());
    }

    /// Records that draws were issued into the active surface's open scene.
    pub fn record_primitives(&self) {
        if let Some(surface) = self.active_surface() {
            let _scene = surface.scene_lock.lock_sync();
            surface.mark_primitives();
        }
    }

    /// Forgets `surface` as the render target if it is the active one.
    pub(crate) fn deactivate(&self, surface: &Arc<RenderSurface>) {
        let mut active = self.active_surface.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, surface)) {
            *active = None;
        }
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("active_surface", &self.active_surface().map(|s| s.id()))
            .finish_non_exhaustive()
    }
}
