// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The framebuffer completeness state machine.

```text
Unknown -> Complete
        -> IncompleteAttachment | IncompleteMissingAttachment | IncompleteDimensions
        -> IncompleteMultisample | Unsupported
```

[`compute_completeness`] runs only from `Unknown`.  Any terminal status drops back to `Unknown`
when a slot is rebound or a bound image changes shape (observed through generation counters),
and a complete framebuffer whose attachments went stale is re-linked by
[`update_ghosted_if_required`] without a full recheck.  [`get_completeness`] does all three in
order and is what callers normally use.

Reaching `Complete` creates (or reuses) the color attachment's render surface and shares it with
the depth and stencil attachments.  A failure partway leaves no half-built surface behind; a
surface already linked to the color attachment stays valid for the next check.
*/

use crate::attachment::{Attachable, Resolution, ResolvedImage};
use crate::context::Context;
use crate::error::Error;
use crate::framebuffer::{
    AttachmentSlot, DepthStencilControl, DrawParams, FrameBuffer, FrameBufferMode, FrameBufferState,
    FrameBufferStatus, LoadStore, Rotation,
};
use crate::layout::{Extent, MemoryLayout};
use crate::lifecycle::{adopt_surface, destroy_attachable_surface};
use crate::pixel_formats::{ChannelBits, FormatClass};
use crate::surface::RenderSurface;
use crate::transport::{DeviceRegion, SurfaceParams};
use std::sync::Arc;

/// Resolves a depth or stencil slot.  `Err` carries the status the framebuffer fails with.
fn check_depth_stencil(
    ctx: &Context,
    attachable: &Attachable,
    slot: AttachmentSlot,
) -> Result<ResolvedImage, FrameBufferStatus> {
    let image = match attachable.resolve() {
        Resolution::Ready(image) => image,
        Resolution::Unrecognized(_) => return Err(FrameBufferStatus::Unsupported),
        Resolution::MissingFormat | Resolution::ZeroSize | Resolution::Deleted => {
            return Err(FrameBufferStatus::IncompleteAttachment);
        }
    };
    let wanted = match slot {
        AttachmentSlot::Depth => FormatClass::Depth,
        AttachmentSlot::Stencil => FormatClass::Stencil,
        AttachmentSlot::Color => {
            debug_assert!(false, "color slot checked as depth/stencil");
            return Err(FrameBufferStatus::IncompleteAttachment);
        }
    };
    let class = image.format.class();
    let acceptable =
        class == wanted || (class == FormatClass::DepthStencil && ctx.config().packed_depth_stencil);
    if acceptable {
        Ok(image)
    } else {
        Err(FrameBufferStatus::IncompleteAttachment)
    }
}

fn merge_bits(color: ChannelBits, other: ChannelBits) -> ChannelBits {
    ChannelBits {
        depth: color.depth.max(other.depth),
        stencil: color.stencil.max(other.stencil),
        ..color
    }
}

fn load_store(ctx: &Context, attachable: &Attachable) -> LoadStore {
    if ctx.config().discard_depth_stencil {
        LoadStore { load: false, store: false }
    } else {
        LoadStore {
            load: attachable.contents_initialized(),
            store: true,
        }
    }
}

/// Computes load/store control for the depth and stencil slots.  Buffers that will be stored
/// count as initialized from then on.
fn compute_control(ctx: &Context, state: &FrameBufferState) -> DepthStencilControl {
    let mut control = DepthStencilControl::default();
    for (slot, target) in [
        (AttachmentSlot::Depth, &mut control.depth),
        (AttachmentSlot::Stencil, &mut control.stencil),
    ] {
        if let Some(attachable) = state.attachable(slot) {
            let value = load_store(ctx, attachable);
            attachable.set_contents_initialized(value.store);
            *target = Some(value);
        }
    }
    control
}

/// Creates or reuses the surface for `color` over `memory`.
fn color_surface(
    ctx: &Context,
    color: &Attachable,
    params: SurfaceParams,
) -> Result<Arc<RenderSurface>, Error> {
    if let Some(existing) = color.surface() {
        if existing.matches(&params) {
            return Ok(existing);
        }
        destroy_attachable_surface(ctx, color);
    }
    let handle = ctx.transport().create_render_surface(&params)?;
    let share_group = ctx.share_group();
    let surface = RenderSurface::new(share_group.next_surface_id(), handle, params);
    share_group.track_surface(surface.id());
    color.link_surface(&surface);
    logwise::debuginternal_sync!(
        "created surface {surface} for attachable {name}",
        surface = surface.id().0,
        name = color.name()
    );
    Ok(surface)
}

/**
Gives depth/stencil attachables the color surface.

An attachable keeps a different live surface of the same size only while some other attachment
point still holds that surface.
*/
fn propagate_surface(ctx: &Context, state: &FrameBufferState, surface: &Arc<RenderSurface>) {
    for slot in [AttachmentSlot::Depth, AttachmentSlot::Stencil] {
        let Some(attachable) = state.attachable(slot) else {
            continue;
        };
        match attachable.surface() {
            Some(current) if Arc::ptr_eq(&current, surface) => {}
            Some(current)
                if !current.is_destroyed()
                    && current.width() == surface.width()
                    && current.height() == surface.height()
                    && current.attachment_refs() > attachable.attachment_points() => {}
            _ => adopt_surface(ctx, attachable, surface),
        }
    }
}

fn surface_params(image: &ResolvedImage, memory: &DeviceRegion) -> SurfaceParams {
    SurfaceParams {
        width: image.width,
        height: image.height,
        format: image.format,
        layout: image.layout,
        stride: image.stride,
        address: memory.address(),
    }
}

fn out_of_memory(state: &mut FrameBufferState, framebuffer: &FrameBuffer, error: Error) -> Error {
    logwise::error_sync!(
        "framebuffer {fb} unsupported: {error}",
        fb = framebuffer.name(),
        error = logwise::privacy::LogIt(&error)
    );
    state.fail(FrameBufferStatus::Unsupported);
    error
}

fn compute_locked(
    ctx: &Context,
    framebuffer: &FrameBuffer,
    state: &mut FrameBufferState,
) -> Result<FrameBufferStatus, Error> {
    if state.status != FrameBufferStatus::Unknown {
        return Ok(state.status);
    }

    //1. color is required
    let Some(color) = state.attachable(AttachmentSlot::Color).cloned() else {
        return Ok(state.fail(FrameBufferStatus::Unsupported));
    };
    let color_image = match color.resolve() {
        Resolution::Ready(image) if image.format.is_color_renderable() => image,
        Resolution::Unrecognized(_) => return Ok(state.fail(FrameBufferStatus::Unsupported)),
        _ => return Ok(state.fail(FrameBufferStatus::IncompleteAttachment)),
    };
    let mut size = Some(Extent::new(color_image.width, color_image.height));
    let mut bits = color_image.format.bits();
    let samples = color_image.samples;

    //2. depth, then stencil
    let mut depth_stencil = Vec::with_capacity(2);
    for slot in [AttachmentSlot::Depth, AttachmentSlot::Stencil] {
        let Some(attachable) = state.attachable(slot).cloned() else {
            continue;
        };
        let image = match check_depth_stencil(ctx, &attachable, slot) {
            Ok(image) => image,
            Err(status) => return Ok(state.fail(status)),
        };
        let extent = Extent::new(image.width, image.height);
        match size {
            Some(fixed) if fixed != extent => {
                return Ok(state.fail(FrameBufferStatus::IncompleteDimensions));
            }
            _ => size = Some(extent),
        }
        bits = merge_bits(bits, image.format.bits());
        depth_stencil.push((attachable, image));
    }

    //3. sample counts
    if ctx.config().track_multisample
        && depth_stencil.iter().any(|(_, image)| image.samples != samples)
    {
        return Ok(state.fail(FrameBufferStatus::IncompleteMultisample));
    }

    //4. something must have a size
    let Some(size) = size else {
        return Ok(state.fail(FrameBufferStatus::IncompleteMissingAttachment));
    };

    //5. build the render target
    let memory = match color.memory(ctx) {
        Ok(memory) => memory,
        Err(e) => return Err(out_of_memory(state, framebuffer, e)),
    };
    for (attachable, _) in &depth_stencil {
        if let Err(e) = attachable.memory(ctx) {
            return Err(out_of_memory(state, framebuffer, e));
        }
    }
    let params = surface_params(&color_image, &memory);
    let surface = match color_surface(ctx, &color, params) {
        Ok(surface) => surface,
        Err(e) => return Err(out_of_memory(state, framebuffer, e)),
    };
    surface.set_sync_override(color.sync_override());
    color.set_resident(memory.address());
    propagate_surface(ctx, state, &surface);
    for (attachable, _) in &depth_stencil {
        if let Ok(region) = attachable.memory(ctx) {
            attachable.set_resident(region.address());
        }
    }

    state.mode = Some(FrameBufferMode { bits, samples });
    state.draw = Some(DrawParams {
        width: size.width,
        height: size.height,
        format: color_image.format,
        stride: color_image.stride,
        layout: color_image.layout,
        memory,
        surface,
        rotation: Rotation::FlipY,
    });
    state.control = compute_control(ctx, state);
    state.observe_ghosting();
    state.status = FrameBufferStatus::Complete;
    framebuffer.notify_params_changed();
    logwise::info_sync!(
        "framebuffer {fb} complete at {width}x{height}",
        fb = framebuffer.name(),
        width = size.width,
        height = size.height
    );
    Ok(FrameBufferStatus::Complete)
}

/**
Resolves the framebuffer's attachments into a status.

Does nothing unless the status is [`FrameBufferStatus::Unknown`], so calling it twice on an
unchanged framebuffer returns the same status and leaves the cached mode alone.  Failing to
allocate memory for the render target sets [`FrameBufferStatus::Unsupported`] and returns the
error.
*/
pub fn compute_completeness(ctx: &Context, framebuffer: &FrameBuffer) -> Result<FrameBufferStatus, Error> {
    let mut state = framebuffer.lock_state();
    compute_locked(ctx, framebuffer, &mut state)
}

fn update_ghosted_locked(
    ctx: &Context,
    framebuffer: &FrameBuffer,
    state: &mut FrameBufferState,
) -> Result<(), Error> {
    if state.status != FrameBufferStatus::Complete {
        return Ok(());
    }
    let color_slot = AttachmentSlot::Color.index();
    let mut changed = false;
    if let Some(bound) = state.slots[color_slot].clone().filter(|bound| bound.ghost_pending()) {
        let color = bound.attachable;
        let Resolution::Ready(image) = color.resolve() else {
            //the shape is unchanged, so this only happens if the object died
            debug_assert!(color.is_deleted(), "ghosted color attachment stopped resolving");
            state.invalidate();
            return Ok(());
        };
        let memory = match color.memory(ctx) {
            Ok(memory) => memory,
            Err(e) => return Err(out_of_memory(state, framebuffer, e)),
        };
        //another framebuffer may already have moved the shared color attachable on
        let old = state.draw.as_ref().map(|draw| draw.surface.clone());
        let surface = match color_surface(ctx, &color, surface_params(&image, &memory)) {
            Ok(surface) => surface,
            Err(e) => return Err(out_of_memory(state, framebuffer, e)),
        };
        surface.set_sync_override(color.sync_override());
        //depth and stencil follow the color surface they were sharing
        for slot in [AttachmentSlot::Depth, AttachmentSlot::Stencil] {
            if let Some(attachable) = state.attachable(slot) {
                let follows = match (&old, attachable.surface()) {
                    (_, None) => true,
                    (_, Some(current)) if current.is_destroyed() => true,
                    (Some(old), Some(current)) => Arc::ptr_eq(old, &current),
                    (None, Some(_)) => false,
                };
                if follows {
                    adopt_surface(ctx, attachable, &surface);
                }
            }
        }
        color.set_resident(memory.address());
        if let Some(draw) = state.draw.as_mut() {
            draw.memory = memory;
            draw.surface = surface;
        }
        if let Some(bound) = state.slots[color_slot].as_mut() {
            bound.ghost_generation = color.ghost_generation();
        }
        logwise::info_sync!(
            "framebuffer {fb} re-linked ghosted color attachment",
            fb = framebuffer.name()
        );
        changed = true;
    }
    let mut depth_stencil_ghosted = false;
    for slot in [AttachmentSlot::Depth, AttachmentSlot::Stencil] {
        let Some(bound) = state.slots[slot.index()].as_mut() else {
            continue;
        };
        if !bound.ghost_pending() {
            continue;
        }
        if bound.attachable.is_ghosted() {
            let memory = match bound.attachable.memory(ctx) {
                Ok(memory) => memory,
                Err(e) => return Err(out_of_memory(state, framebuffer, e)),
            };
            bound.attachable.set_resident(memory.address());
        }
        bound.ghost_generation = bound.attachable.ghost_generation();
        depth_stencil_ghosted = true;
    }
    if depth_stencil_ghosted {
        state.control = compute_control(ctx, state);
        changed = true;
    }
    if changed {
        framebuffer.notify_params_changed();
    }
    Ok(())
}

/**
Re-synchronizes a resolved framebuffer whose attachments went stale.

Each slot remembers the ghost generation it last caught up with, so every framebuffer sharing a
ghosted attachable re-links it, not just the first one to look.  A stale color attachment gets a
surface over its new memory (or the one another framebuffer already built there), shared again
with the depth and stencil attachments that were sharing the old one.  Stale depth and stencil
attachments only have their load/store control recomputed.  Framebuffers that are not complete
are left alone.
*/
pub fn update_ghosted_if_required(ctx: &Context, framebuffer: &FrameBuffer) -> Result<(), Error> {
    let mut state = framebuffer.lock_state();
    update_ghosted_locked(ctx, framebuffer, &mut state)
}

/// The framebuffer's status, recomputed if any bound image changed or went stale.
pub fn get_completeness(ctx: &Context, framebuffer: &FrameBuffer) -> Result<FrameBufferStatus, Error> {
    let mut state = framebuffer.lock_state();
    state.observe_generations();
    update_ghosted_locked(ctx, framebuffer, &mut state)?;
    compute_locked(ctx, framebuffer, &mut state)
}

/// Memory layout of the color target, for the rasterizer's addressing mode.  `None` until the
/// framebuffer is complete.
pub fn color_memory_layout(framebuffer: &FrameBuffer) -> Option<MemoryLayout> {
    framebuffer.draw_params().map(|draw| draw.layout)
}
