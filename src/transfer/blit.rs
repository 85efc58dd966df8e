// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Copies from a framebuffer's drawable into a texture level.

use super::descriptor::{TransferDescriptor, TransferMemory, TransferSurface};
use super::upload::{check_destination_level, destination_surface};
use super::{RejectReason, TransferError, TransferKind, reject, submit};
use crate::context::Context;
use crate::framebuffer::DrawParams;
use crate::layout::Rect;
use crate::pixel_formats::{Conversion, hardware_conversion};
use crate::sync::SyncWaitPolicy;
use crate::texture::Texture;

/// A copy of `src_region` of a drawable into `(face, level)` of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlitRequest {
    pub face: u32,
    pub level: u32,
    /// Where in the level the pixels land; `None` for all of it.
    pub dst_region: Option<Rect>,
    /// Which pixels to copy, in the drawable's logical (rotated) coordinates.
    pub src_region: Rect,
}

/// Returns the destination region, the source region remapped to memory, and the conversion.
fn check_blit(texture: &Texture, request: &BlitRequest, src: &DrawParams) -> Result<(Rect, Rect, Conversion), RejectReason> {
    let geometry = texture.geometry();
    let conversion = hardware_conversion(src.format, geometry.format).ok_or(RejectReason::UnsupportedConversion {
        from: src.format,
        to: geometry.format,
    })?;
    let extent = check_destination_level(geometry, request.face, request.level)?;
    let dst_region = request.dst_region.unwrap_or(extent.full_rect());
    if dst_region.is_empty() || request.src_region.is_empty() || src.extent().is_empty() {
        return Err(RejectReason::ZeroSize);
    }
    let logical = src.rotation.logical_extent(src.extent());
    if !dst_region.fits_in(extent) || !request.src_region.fits_in(logical) {
        return Err(RejectReason::OutOfBounds);
    }
    if dst_region.extent() != request.src_region.extent() {
        return Err(RejectReason::ExtentMismatch);
    }
    geometry
        .rules()
        .check_footprint(dst_region, extent)
        .map_err(RejectReason::Footprint)?;
    let remapped = src.rotation.remap_rect(request.src_region, src.extent());
    src.layout
        .rules()
        .check_footprint(remapped, src.extent())
        .map_err(RejectReason::SourceFootprint)?;
    Ok((dst_region, remapped, conversion))
}

/**
Decides whether the transfer engine can copy `request` from the drawable `src` into `texture`.

The source region is given as the application sees the drawable and is remapped through the
drawable's rotation before the source layout's rules are applied, so every rotation faces the
same restrictions.  Does not touch the texture or the drawable's surface.
*/
pub fn prepare_normal_blit(
    ctx: &Context,
    texture: &Texture,
    request: &BlitRequest,
    src: &DrawParams,
) -> Result<TransferDescriptor<'static>, RejectReason> {
    if !ctx.config().hwtq_enabled {
        return Err(reject(ctx, RejectReason::HwtqDisabled));
    }
    let (dst_region, src_rect, conversion) = check_blit(texture, request, src).map_err(|r| reject(ctx, r))?;
    let dst = destination_surface(texture, request.face, request.level).map_err(|r| reject(ctx, r))?;
    Ok(TransferDescriptor {
        src: TransferSurface {
            memory: TransferMemory::Device(src.memory.clone()),
            width: src.width,
            height: src.height,
            stride: src.stride,
            layout: src.layout,
            chunk_stride: 0,
            format: src.format,
        },
        dst,
        src_rect,
        dst_rect: dst_region,
        wait: SyncWaitPolicy::SourceAndDestination,
        rotation: src.rotation,
        conversion,
        dst_sync: texture.sync(),
        src_sync: Some(src.surface.sync()),
    })
}

/// Submits a prepared blit.  On failure both the texture's and the drawable's sync objects are
/// polled before returning, since the drawable may still be rendering.
pub fn blit(ctx: &Context, descriptor: &TransferDescriptor<'_>) -> Result<(), TransferError> {
    submit(ctx, descriptor, TransferKind::Blit)
}
