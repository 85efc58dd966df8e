// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Framebuffer objects: three attachment slots and the state derived from them.
//!
//! The derived state (status, mode, draw parameters, depth/stencil load-store control) is a
//! cache over the slots.  It is valid exactly when the status is not
//! [`FrameBufferStatus::Unknown`]; anything that changes a slot or the shape of an attached
//! image sets the status back to `Unknown`, and [`crate::completeness`] recomputes it on the
//! next use.

use crate::attachment::Attachable;
use crate::dirty_tracking::{DirtyReceiver, DirtySender};
use crate::layout::{Extent, MemoryLayout, Rect};
use crate::pixel_formats::{ChannelBits, PixelFormat};
use crate::surface::RenderSurface;
use crate::transport::DeviceRegion;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentSlot {
    Color,
    Depth,
    Stencil,
}

impl AttachmentSlot {
    pub const ALL: [AttachmentSlot; 3] = [AttachmentSlot::Color, AttachmentSlot::Depth, AttachmentSlot::Stencil];

    pub const fn index(self) -> usize {
        match self {
            AttachmentSlot::Color => 0,
            AttachmentSlot::Depth => 1,
            AttachmentSlot::Stencil => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameBufferStatus {
    /// Derived state must be recomputed before use.
    Unknown,
    Complete,
    IncompleteAttachment,
    IncompleteMissingAttachment,
    IncompleteDimensions,
    IncompleteMultisample,
    Unsupported,
}

/// Channel layout of a complete framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferMode {
    pub bits: ChannelBits,
    pub samples: u32,
}

/**
Orientation of a drawable relative to its memory.

Transfers whose source is a rotated drawable address the source through
[`Rotation::remap_rect`] and walk it with [`Rotation::source_texel`].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipY,
}

impl Rotation {
    /// Whether logical width and height are swapped relative to memory.
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }

    /// Size of a drawable as the application sees it, given its size in memory.
    pub const fn logical_extent(self, memory: Extent) -> Extent {
        if self.swaps_axes() {
            Extent::new(memory.height, memory.width)
        } else {
            memory
        }
    }

    /**
    Maps a rectangle in logical drawable coordinates to the rectangle of memory it occupies.

    `memory` is the drawable's size in memory.  A rectangle inside the logical extent maps to a
    rectangle inside `memory`.
    */
    pub fn remap_rect(self, rect: Rect, memory: Extent) -> Rect {
        let logical = self.logical_extent(memory);
        match self {
            Rotation::None => rect,
            Rotation::FlipY => Rect::new(
                rect.x,
                logical.height.saturating_sub(rect.y + rect.height),
                rect.width,
                rect.height,
            ),
            Rotation::Rotate180 => Rect::new(
                logical.width.saturating_sub(rect.x + rect.width),
                logical.height.saturating_sub(rect.y + rect.height),
                rect.width,
                rect.height,
            ),
            Rotation::Rotate90 => Rect::new(
                rect.y,
                logical.width.saturating_sub(rect.x + rect.width),
                rect.height,
                rect.width,
            ),
            Rotation::Rotate270 => Rect::new(
                logical.height.saturating_sub(rect.y + rect.height),
                rect.x,
                rect.height,
                rect.width,
            ),
        }
    }

    /// Memory coordinates of the source texel copied to column `i`, row `j` of the destination,
    /// where `source` is the remapped source rectangle.
    pub const fn source_texel(self, source: Rect, i: u32, j: u32) -> (u32, u32) {
        match self {
            Rotation::None => (source.x + i, source.y + j),
            Rotation::FlipY => (source.x + i, source.y + source.height - 1 - j),
            Rotation::Rotate180 => (
                source.x + source.width - 1 - i,
                source.y + source.height - 1 - j,
            ),
            Rotation::Rotate90 => (source.x + j, source.y + source.height - 1 - i),
            Rotation::Rotate270 => (source.x + source.width - 1 - j, source.y + i),
        }
    }
}

/// Denormalized view of a complete framebuffer used for drawing and reading.
#[derive(Debug, Clone)]
pub struct DrawParams {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: u32,
    pub layout: MemoryLayout,
    pub memory: DeviceRegion,
    pub surface: Arc<RenderSurface>,
    pub rotation: Rotation,
}

impl DrawParams {
    /// Size of the drawable in memory.
    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

/// Whether a scene loads a buffer at its start and stores it at its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoadStore {
    pub load: bool,
    pub store: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthStencilControl {
    pub depth: Option<LoadStore>,
    pub stencil: Option<LoadStore>,
}

/// An attachable bound to a slot, with the shape and ghost generations this framebuffer last
/// caught up with.
#[derive(Debug, Clone)]
pub(crate) struct BoundAttachment {
    pub(crate) attachable: Arc<Attachable>,
    pub(crate) generation: u64,
    pub(crate) ghost_generation: u64,
}

impl BoundAttachment {
    pub(crate) fn new(attachable: Arc<Attachable>) -> Self {
        BoundAttachment {
            generation: attachable.generation(),
            ghost_generation: attachable.ghost_generation(),
            attachable,
        }
    }

    /// Whether the attachable's backing moved since this slot last re-linked it.
    pub(crate) fn ghost_pending(&self) -> bool {
        self.attachable.is_ghosted() || self.ghost_generation != self.attachable.ghost_generation()
    }
}

#[derive(Debug)]
pub(crate) struct FrameBufferState {
    pub(crate) slots: [Option<BoundAttachment>; 3],
    pub(crate) status: FrameBufferStatus,
    pub(crate) mode: Option<FrameBufferMode>,
    pub(crate) draw: Option<DrawParams>,
    pub(crate) control: DepthStencilControl,
}

impl FrameBufferState {
    pub(crate) fn attachable(&self, slot: AttachmentSlot) -> Option<&Arc<Attachable>> {
        self.slots[slot.index()].as_ref().map(|bound| &bound.attachable)
    }

    /// Drops all derived state.
    pub(crate) fn invalidate(&mut self) {
        self.status = FrameBufferStatus::Unknown;
        self.mode = None;
        self.draw = None;
        self.control = DepthStencilControl::default();
    }

    /// Sets a terminal non-complete status.
    pub(crate) fn fail(&mut self, status: FrameBufferStatus) -> FrameBufferStatus {
        debug_assert!(!matches!(status, FrameBufferStatus::Unknown | FrameBufferStatus::Complete));
        self.invalidate();
        self.status = status;
        status
    }

    /// Records that every slot has caught up with its attachable's backing.
    pub(crate) fn observe_ghosting(&mut self) {
        for bound in self.slots.iter_mut().flatten() {
            bound.ghost_generation = bound.attachable.ghost_generation();
        }
    }

    /// Picks up shape changes of bound attachables.  Returns whether any slot changed.
    pub(crate) fn observe_generations(&mut self) -> bool {
        let mut changed = false;
        for bound in self.slots.iter_mut().flatten() {
            let generation = bound.attachable.generation();
            if generation != bound.generation {
                bound.generation = generation;
                changed = true;
            }
        }
        if changed {
            self.invalidate();
        }
        changed
    }
}

pub struct FrameBuffer {
    name: u32,
    state: Mutex<FrameBufferState>,
    params_dirty: DirtySender,
}

impl FrameBuffer {
    pub fn new(name: u32) -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer {
            name,
            state: Mutex::new(FrameBufferState {
                slots: [None, None, None],
                status: FrameBufferStatus::Unknown,
                mode: None,
                draw: None,
                control: DepthStencilControl::default(),
            }),
            params_dirty: DirtySender::new(false),
        })
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, FrameBufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last computed status, without recomputing.  See [`crate::completeness::get_completeness`].
    pub fn status(&self) -> FrameBufferStatus {
        self.lock_state().status
    }

    pub fn attachment(&self, slot: AttachmentSlot) -> Option<Arc<Attachable>> {
        self.lock_state().attachable(slot).cloned()
    }

    pub fn mode(&self) -> Option<FrameBufferMode> {
        self.lock_state().mode
    }

    pub fn draw_params(&self) -> Option<DrawParams> {
        self.lock_state().draw.clone()
    }

    pub fn depth_stencil_control(&self) -> DepthStencilControl {
        self.lock_state().control
    }

    /// A flag set every time the draw parameters are recomputed.
    pub fn params_receiver(&self) -> DirtyReceiver {
        self.params_dirty.receiver()
    }

    pub(crate) fn notify_params_changed(&self) {
        self.params_dirty.mark_dirty(true);
    }
}

impl Debug for FrameBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("FrameBuffer")
            .field("name", &self.name)
            .field("status", &state.status)
            .field("slots", &state.slots)
            .field("mode", &state.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROTATIONS: [Rotation; 5] = [
        Rotation::None,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
        Rotation::FlipY,
    ];

    #[test]
    fn remapped_rects_stay_in_memory() {
        let memory = Extent::new(40, 24);
        for rotation in ROTATIONS {
            let logical = rotation.logical_extent(memory);
            for rect in [
                logical.full_rect(),
                Rect::new(0, 0, 1, 1),
                Rect::new(3, 5, 7, 2),
                Rect::new(logical.width - 4, logical.height - 3, 4, 3),
            ] {
                let remapped = rotation.remap_rect(rect, memory);
                assert!(remapped.fits_in(memory), "{rotation:?} {rect:?} -> {remapped:?}");
                assert_eq!(remapped.area(), rect.area());
            }
        }
    }

    /// Walking the remapped rectangle visits the memory texel a logical texel maps to.
    #[test]
    fn source_texels_agree_with_remap() {
        let memory = Extent::new(6, 4);
        for rotation in ROTATIONS {
            let logical = rotation.logical_extent(memory);
            let rect = Rect::new(1, 1, 2, 2);
            let remapped = rotation.remap_rect(rect, memory);
            for j in 0..rect.height {
                for i in 0..rect.width {
                    let single = rotation.remap_rect(Rect::new(rect.x + i, rect.y + j, 1, 1), memory);
                    assert_eq!(
                        rotation.source_texel(remapped, i, j),
                        (single.x, single.y),
                        "{rotation:?} logical {logical:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn generation_change_invalidates() {
        let rb = Attachable::renderbuffer(1);
        let fb = FrameBuffer::new(1);
        let mut state = fb.lock_state();
        state.slots[AttachmentSlot::Color.index()] = Some(BoundAttachment::new(rb.clone()));
        state.status = FrameBufferStatus::IncompleteDimensions;
        assert!(!state.observe_generations());
        rb.bump_generation();
        assert!(state.observe_generations());
        assert_eq!(state.status, FrameBufferStatus::Unknown);
    }

    #[test]
    fn each_slot_tracks_ghosting_separately() {
        use crate::transport::DeviceAddress;
        let rb = Attachable::renderbuffer(2);
        rb.set_resident(DeviceAddress(0x40));
        let mut first = BoundAttachment::new(rb.clone());
        let second = BoundAttachment::new(rb.clone());
        rb.mark_ghosted();
        rb.set_resident(DeviceAddress(0x80));
        assert!(first.ghost_pending());
        first.ghost_generation = rb.ghost_generation();
        assert!(!first.ghost_pending());
        assert!(second.ghost_pending());
    }
}
