// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Creation, sharing and release of render surfaces behind attachment points.

This module is the only place that releases a surface's attachment references.  Every
framebuffer slot binding an attachable holds one reference on the surface linked to it, so a
surface lives exactly as long as some attachment point reaches it.  Before a surface's backing
store is reused or destroyed, the hardware is asked to flush whatever it still has queued against
it.

# Flushing

[`flush_render_surface`] kicks a surface's queued rendering to the hardware.  A context has at
most one open scene, so when the surface has work worth closing and the context is rendering into
a *different* surface that is itself mid-scene, that other surface is closed first.

Surfaces can be shared between contexts of a sharegroup.  Every scene change and kick on a
surface happens under that surface's scene lock, and a context never holds two scene locks at
once.

A failed kick is not fatal: nothing is corrupted, the surface may just show stale pixels.  The
flush functions report it as `false` and log.

# Deferred flushes

Flushes can be parked on the sharegroup's queue with [`queue_flush`] and drained later by the
context that queued them with [`flush_all_unflushed`].
*/

use crate::attachment::{Attachable, AttachmentKind, Backing, RenderBufferStorage};
use crate::context::{Context, PendingFlush};
use crate::error::Error;
use crate::framebuffer::{AttachmentSlot, BoundAttachment, FrameBuffer, FrameBufferStatus};
use crate::pixel_formats::FormatRequest;
use crate::surface::RenderSurface;
use crate::sync::{SyncObject, poll_until_complete};
use crate::transport::KickFlags;
use std::sync::Arc;

fn kick(ctx: &Context, surface: &RenderSurface, flags: KickFlags) -> bool {
    match ctx.transport().kick(surface.handle(), flags) {
        Ok(()) => {
            surface.kicked(flags);
            true
        }
        Err(e) => {
            logwise::warn_sync!(
                "kick of surface {surface} failed: {error}",
                surface = surface.id().0,
                error = logwise::privacy::LogIt(&e)
            );
            false
        }
    }
}

/**
Sends `surface`'s queued rendering to the hardware.

Returns false if a kick failed.  A destroyed surface has nothing queued and flushes trivially.
*/
pub fn flush_render_surface(ctx: &Context, surface: &Arc<RenderSurface>, flags: KickFlags) -> bool {
    let closing_worthwhile = {
        let _scene = surface.scene_lock.lock_sync();
        if surface.is_destroyed() {
            return true;
        }
        surface.in_frame()
            && (surface.has_primitives_since_flush() || flags.end_of_scene || flags.discard)
    };

    let mut ok = true;
    if closing_worthwhile {
        if let Some(other) = ctx.active_surface().filter(|a| !Arc::ptr_eq(a, surface)) {
            let _scene = other.scene_lock.lock_sync();
            if other.in_frame() && !other.is_destroyed() {
                logwise::trace_sync!(
                    "closing scene on surface {other} before flushing {surface}",
                    other = other.id().0,
                    surface = surface.id().0
                );
                ok &= kick(ctx, &other, KickFlags::END_OF_SCENE);
            }
        }
    }

    let _scene = surface.scene_lock.lock_sync();
    if surface.is_destroyed() {
        return ok;
    }
    ok &= kick(ctx, surface, flags);
    ok
}

/// Flushes the surface behind `attachable`, unless it has none or its backing has gone stale.
pub fn flush_if_attachable_is_pending(ctx: &Context, attachable: &Attachable, flags: KickFlags) -> bool {
    if attachable.is_ghosted() {
        return true;
    }
    match attachable.surface() {
        Some(surface) => flush_render_surface(ctx, &surface, flags),
        None => true,
    }
}

fn destroy_surface(ctx: &Context, surface: &Arc<RenderSurface>) {
    ctx.deactivate(surface);
    let _scene = surface.scene_lock.lock_sync();
    if let Err(e) = ctx.transport().destroy_surface(surface.handle()) {
        logwise::error_sync!(
            "kernel refused to destroy surface {surface}: {error}",
            surface = surface.id().0,
            error = logwise::privacy::LogIt(&e)
        );
    }
    let was_tracked = ctx.share_group().untrack_surface(surface.id());
    debug_assert!(was_tracked, "destroyed an untracked surface");
    surface.mark_destroyed();
    logwise::debuginternal_sync!("surface {surface} destroyed", surface = surface.id().0);
}

/**
Unlinks `attachable` from its render surface.

The surface is flushed and loses the attachment references held through this attachable.  At
zero it is destroyed with the kernel and dropped from the sharegroup's tracking set; otherwise
any sync override installed for this attachable is removed.  Texture attachables also give back
their texture's render target use.
*/
pub fn destroy_attachable_surface(ctx: &Context, attachable: &Attachable) {
    if !flush_if_attachable_is_pending(ctx, attachable, KickFlags::END_OF_SCENE) {
        logwise::warn_sync!(
            "flush before releasing attachable {name} failed; continuing",
            name = attachable.name()
        );
    }
    let Some((surface, held)) = attachable.take_surface() else {
        return;
    };
    if surface.is_destroyed() {
        return;
    }
    if surface.release(held) == 0 {
        destroy_surface(ctx, &surface);
    } else {
        surface.restore_sync();
    }
}

/// Drops the attachment reference a framebuffer slot held through `attachable`, destroying the
/// surface if that was the last one.
fn release_point(ctx: &Context, attachable: &Attachable) {
    let Some((surface, remaining)) = attachable.remove_point() else {
        return;
    };
    if remaining == 0 {
        logwise::trace_sync!(
            "last attachment point of surface {surface} removed",
            surface = surface.id().0
        );
        destroy_attachable_surface(ctx, attachable);
    }
}

/// Links `attachable` to `surface`, releasing whatever surface it carried before.
pub(crate) fn adopt_surface(ctx: &Context, attachable: &Attachable, surface: &Arc<RenderSurface>) {
    if let Some(current) = attachable.surface() {
        if Arc::ptr_eq(&current, surface) {
            return;
        }
        destroy_attachable_surface(ctx, attachable);
    }
    attachable.link_surface(surface);
}

/**
Detaches the `(kind, name)` object from `framebuffer`.

Returns whether a slot matched.  The slot's attachment reference is released: a surface no other
attachment point holds is destroyed, while one still held elsewhere stays linked and is reused
when the same, unchanged image is bound again.
*/
pub fn remove_attachment(ctx: &Context, framebuffer: &FrameBuffer, kind: AttachmentKind, name: u32) -> bool {
    let mut state = framebuffer.lock_state();
    let was_complete = state.status == FrameBufferStatus::Complete;
    let Some(slot) = AttachmentSlot::ALL.into_iter().find(|slot| {
        state
            .attachable(*slot)
            .is_some_and(|attachable| attachable.is(kind, name))
    }) else {
        return false;
    };
    let Some(bound) = state.slots[slot.index()].take() else {
        return false;
    };
    if was_complete && !flush_if_attachable_is_pending(ctx, &bound.attachable, KickFlags::NONE) {
        logwise::warn_sync!(
            "flush while detaching {name} from framebuffer {fb} failed",
            name = name,
            fb = framebuffer.name()
        );
    }
    release_point(ctx, &bound.attachable);
    state.invalidate();
    logwise::trace_sync!(
        "detached {name} from {slot} of framebuffer {fb}",
        name = name,
        slot = logwise::privacy::LogIt(&slot),
        fb = framebuffer.name()
    );
    true
}

/**
Binds `attachable` to `slot`, or clears the slot with `None`.

An object can occupy one slot per framebuffer; binding it to a second slot moves it.
*/
pub fn bind_attachment(
    ctx: &Context,
    framebuffer: &FrameBuffer,
    slot: AttachmentSlot,
    attachable: Option<Arc<Attachable>>,
) {
    let mut state = framebuffer.lock_state();
    let unchanged = match (state.attachable(slot), &attachable) {
        (Some(current), Some(new)) => Arc::ptr_eq(current, new),
        (None, None) => true,
        _ => false,
    };
    if unchanged {
        return;
    }
    let was_complete = state.status == FrameBufferStatus::Complete;
    let mut unbound = Vec::new();
    if let Some(new) = &attachable {
        new.add_point();
        for other in AttachmentSlot::ALL.into_iter().filter(|s| *s != slot) {
            if state.attachable(other).is_some_and(|a| Arc::ptr_eq(a, new)) {
                unbound.extend(state.slots[other.index()].take());
            }
        }
    }
    let previous = std::mem::replace(
        &mut state.slots[slot.index()],
        attachable.map(BoundAttachment::new),
    );
    if let Some(previous) = previous {
        if was_complete && !flush_if_attachable_is_pending(ctx, &previous.attachable, KickFlags::NONE) {
            logwise::warn_sync!(
                "flush of replaced attachment {name} failed",
                name = previous.attachable.name()
            );
        }
        unbound.push(previous);
    }
    for bound in &unbound {
        release_point(ctx, &bound.attachable);
    }
    state.invalidate();
}

/**
Records that `attachable`'s image changed shape.

Every framebuffer bound to it sees the new generation and recomputes; the surface built for the
old shape is released now.
*/
pub fn notify_attachable_modified(ctx: &Context, attachable: &Attachable) {
    attachable.bump_generation();
    destroy_attachable_surface(ctx, attachable);
}

/// Gives a renderbuffer new storage, laid out as the context is configured to.
pub fn renderbuffer_storage(
    ctx: &Context,
    renderbuffer: &Attachable,
    width: u32,
    height: u32,
    format: impl Into<FormatRequest>,
    samples: u32,
) -> Result<(), Error> {
    let storage = RenderBufferStorage {
        width,
        height,
        format: format.into(),
        samples,
        layout: ctx.config().renderbuffer_layout,
    };
    //the old storage may still be the target of queued rendering
    destroy_attachable_surface(ctx, renderbuffer);
    if !renderbuffer.set_storage(ctx.transport(), storage) {
        debug_assert!(false, "renderbuffer storage on a texture attachable");
        return Err(Error::Internal("renderbuffer storage on a texture attachable"));
    }
    renderbuffer.bump_generation();
    Ok(())
}

/// Final release of an attachable whose API object was deleted.
pub fn delete_attachable(ctx: &Context, attachable: &Attachable) {
    attachable.mark_deleted();
    notify_attachable_modified(ctx, attachable);
    attachable.free_memory(ctx.transport());
}

/**
Image-sharing entry point: the attachable's backing moved.

The attachable is marked stale; [`crate::completeness::update_ghosted_if_required`] re-links its
surface on the next use.  `sync`, when given, is the shared image's sync object.  It is always
installed on the attachable, and on its current surface only when the attachable is that
surface's color image: a surface lent to a depth or stencil buffer keeps tracking its own color.
*/
pub fn ghost_attachable(attachable: &Attachable, sync: Option<Arc<SyncObject>>) {
    let owned_surface = attachable
        .surface()
        .filter(|surface| attachable.backing() == Backing::Resident(surface.address()));
    attachable.mark_ghosted();
    if sync.is_some() {
        if let Some(surface) = owned_surface {
            surface.set_sync_override(sync.clone());
        }
        attachable.set_sync_override(sync);
    }
}

/// Parks a flush of `surface` on the sharegroup queue, to be issued by [`flush_all_unflushed`].
pub fn queue_flush(ctx: &Context, surface: &Arc<RenderSurface>, flags: KickFlags) {
    ctx.share_group().pending_flushes.lock_sync().push_back(PendingFlush {
        context: ctx.id(),
        surface: surface.clone(),
        flags,
    });
}

/**
Issues every flush this context queued, oldest first.

Other contexts' entries stay where they are.  Entries that fail are put back at the end of the
queue, still in their original order.  With `wait_for_hardware`, each successful flush is
followed by a bounded wait for the surface's sync object.

Returns how many entries were flushed.
*/
pub fn flush_all_unflushed(ctx: &Context, wait_for_hardware: bool) -> usize {
    let share_group = ctx.share_group();
    let mine: Vec<PendingFlush> = {
        let mut queue = share_group.pending_flushes.lock_sync();
        let (mine, others): (Vec<_>, Vec<_>) =
            queue.drain(..).partition(|entry| entry.context == ctx.id());
        queue.extend(others);
        mine
    };
    let mut flushed = 0;
    let mut failed = Vec::new();
    for entry in mine {
        if flush_render_surface(ctx, &entry.surface, entry.flags) {
            flushed += 1;
            if wait_for_hardware
                && !poll_until_complete(
                    ctx.transport(),
                    &entry.surface.sync(),
                    ctx.config().sync_wait_budget,
                )
            {
                logwise::warn_sync!(
                    "surface {surface} still busy after flush",
                    surface = entry.surface.id().0
                );
            }
        } else {
            failed.push(entry);
        }
    }
    if !failed.is_empty() {
        logwise::warn_sync!("requeueing {count} failed flushes", count = failed.len());
        share_group.pending_flushes.lock_sync().extend(failed);
    }
    flushed
}
