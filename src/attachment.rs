// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Attachables: anything a framebuffer slot can bind.

An [`Attachable`] is either one `(face, level)` image of a [`Texture`] or a renderbuffer that owns
its storage.  Besides the image itself it carries the state the lifecycle and completeness code
hang off it:

- an optional link to the [`RenderSurface`] built over it, and how many framebuffer slots bind
  it; each of those slots holds one attachment reference on the linked surface
- its [`Backing`]: resident at a known address, or stale after an image-sharing event, plus a
  ghost generation bumped by every such event so each framebuffer notices it separately
- a generation counter bumped whenever its shape changes, which framebuffers compare against
  the value they observed when they last resolved
- whether its contents have ever been stored, which decides depth/stencil loads
*/

use crate::context::Context;
use crate::error::Error;
use crate::layout::{Extent, MemoryLayout};
use crate::pixel_formats::{FormatRequest, PixelFormat};
use crate::surface::RenderSurface;
use crate::sync::SyncObject;
use crate::texture::{self, Residency, Texture};
use crate::transport::{DeviceAddress, DeviceAllocation, DeviceRegion, Transport};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Texture,
    RenderBuffer,
}

/// Where an attachable's pixels currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backing {
    /// Never resolved by a completeness check.
    Unresolved,
    Resident(DeviceAddress),
    /// The backing allocation was replaced underneath a linked surface.
    Stale,
}

/// Storage parameters of a renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderBufferStorage {
    pub width: u32,
    pub height: u32,
    pub format: FormatRequest,
    /// 0 for single sampled.
    pub samples: u32,
    pub layout: MemoryLayout,
}

#[derive(Debug, Default)]
struct RenderBufferState {
    storage: Option<RenderBufferStorage>,
    allocation: Option<DeviceAllocation>,
}

enum Source {
    TextureLevel {
        texture: Weak<Texture>,
        face: u32,
        level: u32,
    },
    RenderBuffer(Mutex<RenderBufferState>),
}

/// The image an attachable currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub samples: u32,
    pub layout: MemoryLayout,
    /// Row stride in bytes.
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Ready(ResolvedImage),
    /// A texture level that was never specified, or a renderbuffer without storage.
    MissingFormat,
    ZeroSize,
    /// The API layer requested a format this driver does not know.
    Unrecognized(u32),
    /// The API object was deleted or its texture dropped.
    Deleted,
}

/// The linked surface and the number of slots referencing it through this attachable.
#[derive(Debug, Default)]
struct SurfaceLink {
    surface: Option<Arc<RenderSurface>>,
    points: u32,
}

pub struct Attachable {
    kind: AttachmentKind,
    name: u32,
    source: Source,
    link: Mutex<SurfaceLink>,
    backing: Mutex<Backing>,
    sync_override: Mutex<Option<Arc<SyncObject>>>,
    generation: AtomicU64,
    ghost_generation: AtomicU64,
    contents_initialized: AtomicBool,
    deleted: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Attachable {
    fn with_source(kind: AttachmentKind, name: u32, source: Source) -> Arc<Attachable> {
        Arc::new(Attachable {
            kind,
            name,
            source,
            link: Mutex::new(SurfaceLink::default()),
            backing: Mutex::new(Backing::Unresolved),
            sync_override: Mutex::new(None),
            generation: AtomicU64::new(0),
            ghost_generation: AtomicU64::new(0),
            contents_initialized: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        })
    }

    pub(crate) fn texture_level(name: u32, texture: Weak<Texture>, face: u32, level: u32) -> Arc<Attachable> {
        Self::with_source(
            AttachmentKind::Texture,
            name,
            Source::TextureLevel { texture, face, level },
        )
    }

    /// A renderbuffer with no storage yet.  See [`crate::lifecycle::renderbuffer_storage`].
    pub fn renderbuffer(name: u32) -> Arc<Attachable> {
        Self::with_source(
            AttachmentKind::RenderBuffer,
            name,
            Source::RenderBuffer(Mutex::new(RenderBufferState::default())),
        )
    }

    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    /// Whether this is the API object `(kind, name)`.
    pub fn is(&self, kind: AttachmentKind, name: u32) -> bool {
        self.kind == kind && self.name == name
    }

    /// The owning texture, for texture attachables whose texture is still alive.
    pub fn texture(&self) -> Option<Arc<Texture>> {
        match &self.source {
            Source::TextureLevel { texture, .. } => texture.upgrade(),
            Source::RenderBuffer(_) => None,
        }
    }

    /// `(face, level)` for texture attachables.
    pub fn face_level(&self) -> Option<(u32, u32)> {
        match &self.source {
            Source::TextureLevel { face, level, .. } => Some((*face, *level)),
            Source::RenderBuffer(_) => None,
        }
    }

    pub fn storage(&self) -> Option<RenderBufferStorage> {
        match &self.source {
            Source::RenderBuffer(state) => lock(state).storage,
            Source::TextureLevel { .. } => None,
        }
    }

    /// Works out what image the attachable currently stands for.  Pure.
    pub fn resolve(&self) -> Resolution {
        if self.is_deleted() {
            return Resolution::Deleted;
        }
        match &self.source {
            Source::TextureLevel { texture, face, level } => {
                let Some(texture) = texture.upgrade() else {
                    return Resolution::Deleted;
                };
                if !texture.is_specified(*face, *level) {
                    return Resolution::MissingFormat;
                }
                let geometry = texture.geometry();
                let extent = geometry.level_extent(*level);
                if extent.is_empty() {
                    return Resolution::ZeroSize;
                }
                Resolution::Ready(ResolvedImage {
                    width: extent.width,
                    height: extent.height,
                    format: geometry.format,
                    samples: 0,
                    layout: geometry.layout,
                    stride: geometry.level_stride(*level),
                })
            }
            Source::RenderBuffer(state) => {
                let Some(storage) = lock(state).storage else {
                    return Resolution::MissingFormat;
                };
                let format = match storage.format {
                    FormatRequest::Known(format) => format,
                    FormatRequest::Unrecognized(code) => return Resolution::Unrecognized(code),
                };
                if storage.width == 0 || storage.height == 0 {
                    return Resolution::ZeroSize;
                }
                Resolution::Ready(ResolvedImage {
                    width: storage.width,
                    height: storage.height,
                    format,
                    samples: storage.samples,
                    layout: storage.layout,
                    stride: storage
                        .layout
                        .rules()
                        .stride_bytes(storage.width, format.bytes_per_texel()),
                })
            }
        }
    }

    /**
    Device memory holding the image, allocated on first use.

    Texture levels that still have staged bytes are translated first, since rendering writes
    the device copy.  Renderbuffer storage is sized for every sample.
    */
    pub(crate) fn memory(&self, ctx: &Context) -> Result<DeviceRegion, Error> {
        match &self.source {
            Source::TextureLevel { texture, face, level } => {
                let texture = texture.upgrade().ok_or(Error::Internal("texture dropped"))?;
                texture.ensure_allocation(ctx.transport())?;
                if texture.residency(*face, *level) == Some(Residency::Staged) {
                    texture::translate_level(ctx, &texture, *face, *level)?;
                }
                texture
                    .level_region(*face, *level)
                    .ok_or(Error::Internal("texture level outside allocation"))
            }
            Source::RenderBuffer(state) => {
                let mut state = lock(state);
                if let Some(allocation) = &state.allocation {
                    return Ok(DeviceRegion {
                        allocation: allocation.clone(),
                        offset: 0,
                    });
                }
                let storage = state.storage.ok_or(Error::Internal("renderbuffer without storage"))?;
                let FormatRequest::Known(format) = storage.format else {
                    return Err(Error::Internal("renderbuffer with unrecognized format"));
                };
                let rules = storage.layout.rules();
                let stride = rules.stride_bytes(storage.width, format.bytes_per_texel());
                let rows = rules.round_extent(Extent::new(storage.width, storage.height)).height;
                let bytes = stride as u64 * rows as u64 * storage.samples.max(1) as u64;
                let allocation = ctx
                    .transport()
                    .allocate(bytes, "renderbuffer")
                    .map_err(|e| Error::from_allocation(e, "renderbuffer"))?;
                state.allocation = Some(allocation.clone());
                Ok(DeviceRegion { allocation, offset: 0 })
            }
        }
    }

    /// Replaces renderbuffer storage, freeing the old allocation.  Returns false for textures.
    pub(crate) fn set_storage(&self, transport: &dyn Transport, storage: RenderBufferStorage) -> bool {
        let Source::RenderBuffer(state) = &self.source else {
            return false;
        };
        let old = {
            let mut state = lock(state);
            state.storage = Some(storage);
            state.allocation.take()
        };
        if let Some(old) = old {
            transport.free(old);
        }
        self.contents_initialized.store(false, Ordering::Release);
        true
    }

    /// Frees renderbuffer memory.  Texture memory belongs to the texture.
    pub(crate) fn free_memory(&self, transport: &dyn Transport) {
        if let Source::RenderBuffer(state) = &self.source {
            if let Some(allocation) = lock(state).allocation.take() {
                transport.free(allocation);
            }
        }
    }

    /// The render surface linked to this attachable.
    pub fn surface(&self) -> Option<Arc<RenderSurface>> {
        lock(&self.link).surface.clone()
    }

    /// Number of framebuffer slots currently binding this attachable.
    pub fn attachment_points(&self) -> u32 {
        lock(&self.link).points
    }

    /// Links `surface`, taking one attachment reference on it per slot binding this attachable.
    pub(crate) fn link_surface(&self, surface: &Arc<RenderSurface>) {
        {
            let mut link = lock(&self.link);
            debug_assert!(link.surface.is_none(), "linked a surface over another one");
            surface.retain(link.points);
            link.surface = Some(surface.clone());
        }
        if let Some(texture) = self.texture() {
            texture.add_render_target_use();
        }
    }

    /**
    Unlinks the surface.

    Returns it with the number of attachment references this attachable held on it, which the
    caller releases.  A surface that was already destroyed comes back with zero.
    */
    pub(crate) fn take_surface(&self) -> Option<(Arc<RenderSurface>, u32)> {
        let taken = {
            let mut link = lock(&self.link);
            let surface = link.surface.take()?;
            let held = if surface.is_destroyed() { 0 } else { link.points };
            (surface, held)
        };
        if let Some(texture) = self.texture() {
            texture.remove_render_target_use();
        }
        Some(taken)
    }

    /// Counts a slot that now binds this attachable.  A live linked surface gains a reference;
    /// a link to a destroyed one is dropped.
    pub(crate) fn add_point(&self) {
        let dropped_stale = {
            let mut link = lock(&self.link);
            link.points += 1;
            match &link.surface {
                Some(surface) if surface.is_destroyed() => link.surface.take().is_some(),
                Some(surface) => {
                    surface.retain(1);
                    false
                }
                None => false,
            }
        };
        if dropped_stale {
            if let Some(texture) = self.texture() {
                texture.remove_render_target_use();
            }
        }
    }

    /**
    Counts a slot that no longer binds this attachable.

    If a live surface is linked, that slot's reference on it is dropped and the surface is
    returned with the references it has left.  A surface left with none stays linked; the caller
    tears it down with [`crate::lifecycle::destroy_attachable_surface`].
    */
    pub(crate) fn remove_point(&self) -> Option<(Arc<RenderSurface>, u32)> {
        let mut link = lock(&self.link);
        debug_assert!(link.points > 0, "unbound an attachable no slot was binding");
        link.points = link.points.saturating_sub(1);
        let surface = link.surface.clone().filter(|surface| !surface.is_destroyed())?;
        let remaining = surface.release(1);
        Some((surface, remaining))
    }

    pub fn backing(&self) -> Backing {
        *lock(&self.backing)
    }

    /// Whether the backing memory moved since the attachable was last resolved.
    pub fn is_ghosted(&self) -> bool {
        self.backing() == Backing::Stale
    }

    pub(crate) fn mark_ghosted(&self) {
        *lock(&self.backing) = Backing::Stale;
        self.ghost_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Counts image-sharing events on this attachable.  A framebuffer whose slot recorded an
    /// older value has not yet caught up with the new backing.
    pub fn ghost_generation(&self) -> u64 {
        self.ghost_generation.load(Ordering::Acquire)
    }

    pub(crate) fn set_resident(&self, address: DeviceAddress) {
        *lock(&self.backing) = Backing::Resident(address);
    }

    /// The sync object a surface over this attachable should use instead of its own.
    pub fn sync_override(&self) -> Option<Arc<SyncObject>> {
        lock(&self.sync_override)
            .clone()
            .or_else(|| self.texture().and_then(|texture| texture.sync_override()))
    }

    pub(crate) fn set_sync_override(&self, sync: Option<Arc<SyncObject>>) {
        *lock(&self.sync_override) = sync;
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether a previous scene stored this buffer, so loading it is meaningful.
    pub fn contents_initialized(&self) -> bool {
        self.contents_initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_contents_initialized(&self, initialized: bool) {
        self.contents_initialized.store(initialized, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}

impl Debug for Attachable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachable")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("face_level", &self.face_level())
            .field("surface", &self.surface().map(|s| s.id()))
            .field("backing", &self.backing())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackTransport;

    fn storage(width: u32, height: u32, format: FormatRequest) -> RenderBufferStorage {
        RenderBufferStorage {
            width,
            height,
            format,
            samples: 0,
            layout: MemoryLayout::Strided,
        }
    }

    #[test]
    fn renderbuffer_resolution() {
        let transport = LoopbackTransport::new();
        let rb = Attachable::renderbuffer(3);
        assert_eq!(rb.resolve(), Resolution::MissingFormat);
        rb.set_storage(&transport, storage(0, 0, PixelFormat::Rgba8888.into()));
        assert_eq!(rb.resolve(), Resolution::ZeroSize);
        rb.set_storage(&transport, storage(4, 4, FormatRequest::Unrecognized(0x8d48)));
        assert_eq!(rb.resolve(), Resolution::Unrecognized(0x8d48));
        rb.set_storage(&transport, storage(20, 4, PixelFormat::Rgb565.into()));
        let Resolution::Ready(image) = rb.resolve() else {
            panic!("expected a resolved image");
        };
        assert_eq!(image.stride, 32 * 2);
        rb.mark_deleted();
        assert_eq!(rb.resolve(), Resolution::Deleted);
    }

    #[test]
    fn texture_attachable_follows_texture_lifetime() {
        use crate::layout::TextureGeometry;
        let texture = Texture::new(
            9,
            TextureGeometry::new(16, 8, PixelFormat::Rgba8888, MemoryLayout::Strided).with_levels(2),
        );
        let attachable = texture.attachable(0, 1).expect("level 1");
        assert!(attachable.is(AttachmentKind::Texture, 9));
        assert_eq!(attachable.resolve(), Resolution::MissingFormat);
        texture.specify_level(0, 1, None).expect("specify");
        let Resolution::Ready(image) = attachable.resolve() else {
            panic!("expected a resolved image");
        };
        assert_eq!((image.width, image.height), (8, 4));
        drop(texture);
        assert_eq!(attachable.resolve(), Resolution::Deleted);
    }

    #[test]
    fn ghosting_is_a_backing_state() {
        let rb = Attachable::renderbuffer(1);
        assert_eq!(rb.backing(), Backing::Unresolved);
        rb.set_resident(DeviceAddress(0x40));
        assert!(!rb.is_ghosted());
        rb.mark_ghosted();
        assert!(rb.is_ghosted());
        assert_eq!(rb.ghost_generation(), 1);
        rb.set_resident(DeviceAddress(0x80));
        rb.mark_ghosted();
        assert_eq!(rb.ghost_generation(), 2);
    }

    #[test]
    fn attachment_points_hold_surface_references() {
        use crate::surface::{RenderSurface, SurfaceId};
        use crate::transport::{SurfaceHandle, SurfaceParams};
        let surface = RenderSurface::new(
            SurfaceId(1),
            SurfaceHandle(1),
            SurfaceParams {
                width: 4,
                height: 4,
                format: PixelFormat::Rgba8888,
                layout: MemoryLayout::Strided,
                stride: 16,
                address: DeviceAddress(0x100),
            },
        );
        let rb = Attachable::renderbuffer(3);
        rb.add_point();
        rb.add_point();
        rb.link_surface(&surface);
        assert_eq!(surface.attachment_refs(), 2);
        assert_eq!(rb.attachment_points(), 2);

        let (_, remaining) = rb.remove_point().expect("linked");
        assert_eq!(remaining, 1);
        rb.add_point();
        assert_eq!(surface.attachment_refs(), 2);

        let (taken, held) = rb.take_surface().expect("linked");
        assert!(Arc::ptr_eq(&taken, &surface));
        assert_eq!(held, 2);
        assert!(rb.surface().is_none());
    }

    #[test]
    fn binding_drops_a_link_to_a_destroyed_surface() {
        use crate::surface::{RenderSurface, SurfaceId};
        use crate::transport::{SurfaceHandle, SurfaceParams};
        let surface = RenderSurface::new(
            SurfaceId(2),
            SurfaceHandle(2),
            SurfaceParams {
                width: 4,
                height: 4,
                format: PixelFormat::Rgba8888,
                layout: MemoryLayout::Strided,
                stride: 16,
                address: DeviceAddress(0x100),
            },
        );
        let rb = Attachable::renderbuffer(4);
        rb.add_point();
        rb.link_surface(&surface);
        surface.mark_destroyed();
        assert!(rb.remove_point().is_none());
        rb.add_point();
        assert!(rb.surface().is_none());
        assert_eq!(rb.attachment_points(), 1);
    }
}
