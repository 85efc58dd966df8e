// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Uploads from application memory into a texture level.

use super::descriptor::{TransferDescriptor, TransferMemory, TransferSurface};
use super::fallback::{self, CodecRequest, software_upload};
use super::{MAX_SOURCE_STRIDE, MIN_TRANSFER_DIMENSION, RejectReason, TransferError, TransferKind, reject, submit};
use crate::bittricks::align_up;
use crate::context::Context;
use crate::error::Error;
use crate::framebuffer::Rotation;
use crate::layout::{Extent, MemoryLayout, Rect, TextureGeometry};
use crate::pixel_formats::{Conversion, PixelFormat, hardware_conversion};
use crate::sync::SyncWaitPolicy;
use crate::texture::{Residency, Texture, translate_level};

/// An upload of application pixels into `(face, level)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRequest<'a> {
    pub face: u32,
    pub level: u32,
    /// The part of the level written; `None` for all of it.
    pub region: Option<Rect>,
    /// Rows of `source_format` texels, `source_stride` bytes apart.
    pub source: &'a [u8],
    pub source_format: PixelFormat,
    pub source_stride: u32,
}

impl<'a> UploadRequest<'a> {
    /// Writes the whole level.
    pub fn full(face: u32, level: u32, source: &'a [u8], source_format: PixelFormat, source_stride: u32) -> Self {
        UploadRequest {
            face,
            level,
            region: None,
            source,
            source_format,
            source_stride,
        }
    }
}

/// Which path an upload took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadPath {
    Hardware,
    Software,
}

/// Restrictions on the destination level shared by uploads and blits.
pub(super) fn check_destination_level(
    geometry: &TextureGeometry,
    face: u32,
    level: u32,
) -> Result<Extent, RejectReason> {
    if face >= geometry.faces || level >= geometry.levels {
        return Err(RejectReason::OutOfBounds);
    }
    let extent = geometry.level_extent(level);
    if extent.is_empty() || geometry.level_byte_size(level) == 0 {
        return Err(RejectReason::ZeroSize);
    }
    //engine erratum below this size
    if extent.width < MIN_TRANSFER_DIMENSION || extent.height < MIN_TRANSFER_DIMENSION {
        return Err(RejectReason::BelowTileGranularity);
    }
    if geometry.format.is_compressed() {
        return Err(RejectReason::CompressedFormat);
    }
    if geometry.format.chunk_count() > 1 {
        return Err(RejectReason::MultiChunkFormat);
    }
    Ok(extent)
}

/// The destination side of a transfer into `(face, level)`.
pub(super) fn destination_surface(
    texture: &Texture,
    face: u32,
    level: u32,
) -> Result<TransferSurface<'static>, RejectReason> {
    let geometry = texture.geometry();
    let region = texture
        .level_region(face, level)
        .ok_or(RejectReason::NoDeviceMemory)?;
    let extent = geometry.level_extent(level);
    Ok(TransferSurface {
        memory: TransferMemory::Device(region),
        width: extent.width,
        height: extent.height,
        stride: geometry.level_stride(level),
        layout: geometry.layout,
        chunk_stride: geometry.chunk_stride(level),
        format: geometry.format,
    })
}

/// Checks everything about an upload that does not need device memory.
fn check_upload(texture: &Texture, request: &UploadRequest<'_>) -> Result<(Rect, Conversion), RejectReason> {
    let geometry = texture.geometry();
    let extent = check_destination_level(geometry, request.face, request.level)?;
    let region = request.region.unwrap_or(extent.full_rect());
    if region.is_empty() {
        return Err(RejectReason::ZeroSize);
    }
    if !region.fits_in(extent) {
        return Err(RejectReason::OutOfBounds);
    }
    let conversion = hardware_conversion(request.source_format, geometry.format).ok_or(
        RejectReason::UnsupportedConversion {
            from: request.source_format,
            to: geometry.format,
        },
    )?;
    let row_bytes = fallback::packed_row_bytes(request.source_format, region.width);
    if request.source_stride < row_bytes || request.source_stride > MAX_SOURCE_STRIDE {
        return Err(RejectReason::UnrecognizedRowLayout);
    }
    let needed = (region.height as usize - 1) * request.source_stride as usize + row_bytes as usize;
    if request.source.len() < needed {
        return Err(RejectReason::SourceTooSmall);
    }
    geometry
        .rules()
        .check_footprint(region, extent)
        .map_err(RejectReason::Footprint)?;
    Ok((region, conversion))
}

/// Repacks source rows into 4-byte aligned rows the engine can walk.
fn repack(ctx: &Context, request: &UploadRequest<'_>, region: Rect) -> (Vec<u8>, u32) {
    let stride = align_up(fallback::packed_row_bytes(request.source_format, region.width), 4);
    let mut staging = vec![0u8; stride as usize * region.height as usize];
    ctx.codec().convert(
        &mut staging,
        request.source,
        &CodecRequest {
            src_format: request.source_format,
            dst_format: request.source_format,
            width: region.width,
            height: region.height,
            src_stride: request.source_stride,
            level: request.level,
            dst_stride: Some(stride),
        },
    );
    (staging, stride)
}

/**
Decides whether the transfer engine can perform `request`, and builds its descriptor.

Does not touch the texture.  The level must already have device memory; a texture that has
never been allocated is rejected with [`RejectReason::NoDeviceMemory`].  Source rows whose
pitch is not a multiple of four bytes are repacked into a staging copy.
*/
pub fn prepare_upload<'a>(
    ctx: &Context,
    texture: &Texture,
    request: &UploadRequest<'a>,
) -> Result<TransferDescriptor<'a>, RejectReason> {
    if !ctx.config().hwtq_enabled {
        return Err(reject(ctx, RejectReason::HwtqDisabled));
    }
    let (region, conversion) = check_upload(texture, request).map_err(|r| reject(ctx, r))?;
    let dst = destination_surface(texture, request.face, request.level).map_err(|r| reject(ctx, r))?;
    let (memory, stride) = if request.source_stride % 4 == 0 {
        (TransferMemory::Host(request.source), request.source_stride)
    } else {
        let (staging, stride) = repack(ctx, request, region);
        (TransferMemory::Staging(staging), stride)
    };
    Ok(TransferDescriptor {
        src: TransferSurface {
            memory,
            width: region.width,
            height: region.height,
            stride,
            layout: MemoryLayout::Strided,
            chunk_stride: 0,
            format: request.source_format,
        },
        dst,
        src_rect: region.extent().full_rect(),
        dst_rect: region,
        wait: SyncWaitPolicy::Destination,
        rotation: Rotation::None,
        conversion,
        dst_sync: texture.sync(),
        src_sync: None,
    })
}

/**
Submits a prepared upload.

On failure the destination's sync object is left as it was and polled within the context's
wait budget before returning; the caller redoes the upload in software.
*/
pub fn upload(ctx: &Context, descriptor: &TransferDescriptor<'_>) -> Result<(), TransferError> {
    submit(ctx, descriptor, TransferKind::Upload)
}

/**
Uploads `request`, on the hardware when it can and in software otherwise.

Staged contents of the level are translated first so a partial upload lands on top of them.
Uploading into a level that was never specified specifies it.
*/
pub fn upload_texture(ctx: &Context, texture: &Texture, request: &UploadRequest<'_>) -> Result<UploadPath, Error> {
    let (face, level) = (request.face, request.level);
    match texture.residency(face, level) {
        None => return Err(Error::InvalidRegion { face, level }),
        Some(Residency::NotYetAllocated) => texture.specify_level(face, level, None)?,
        Some(Residency::Staged) => translate_level(ctx, texture, face, level)?,
        Some(Residency::Resident) => {}
    }
    texture.ensure_allocation(ctx.transport())?;
    if let Ok(descriptor) = prepare_upload(ctx, texture, request) {
        match upload(ctx, &descriptor) {
            Ok(()) => return Ok(UploadPath::Hardware),
            Err(e) => {
                logwise::info_sync!(
                    "texture {name} upload falls back to software: {error}",
                    name = texture.name(),
                    error = logwise::privacy::LogIt(&e)
                );
            }
        }
    }
    software_upload(ctx, texture, request)?;
    Ok(UploadPath::Software)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::context::ShareGroup;
    use crate::layout::rules::FootprintViolation;
    use crate::transport::loopback::LoopbackTransport;
    use std::sync::Arc;

    fn context(config: DriverConfig) -> (Arc<LoopbackTransport>, Context) {
        let transport = Arc::new(LoopbackTransport::new());
        let group = ShareGroup::new(transport.clone());
        (transport, Context::new(&group, config))
    }

    fn allocated(ctx: &Context, geometry: TextureGeometry) -> Arc<Texture> {
        let texture = Texture::new(1, geometry);
        texture.ensure_allocation(ctx.transport()).expect("allocation");
        texture
    }

    fn rejection(ctx: &Context, texture: &Texture, request: &UploadRequest<'_>) -> Option<RejectReason> {
        prepare_upload(ctx, texture, request).err()
    }

    #[test]
    fn strided_minimum_applies_above_sixteen_pixels() {
        let (_t, ctx) = context(DriverConfig::default());
        let texture = allocated(&ctx, TextureGeometry::new(32, 32, PixelFormat::Rgba8888, MemoryLayout::Strided));
        let source = vec![0u8; 32 * 32 * 4];
        let with_region = |region| UploadRequest {
            region: Some(region),
            ..UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 128)
        };
        assert_eq!(rejection(&ctx, &texture, &with_region(Rect::new(0, 0, 2, 2))), None);
        assert_eq!(rejection(&ctx, &texture, &with_region(Rect::new(5, 5, 8, 2))), None);
        assert_eq!(
            rejection(&ctx, &texture, &with_region(Rect::new(5, 5, 9, 2))),
            Some(RejectReason::Footprint(FootprintViolation::TooSmall {
                minimum: Extent::new(3, 3)
            }))
        );
        //clamping happens before the minimum is checked
        assert_eq!(
            rejection(&ctx, &texture, &with_region(Rect::new(30, 0, 2, 32))),
            Some(RejectReason::Footprint(FootprintViolation::TooSmall {
                minimum: Extent::new(3, 3)
            }))
        );
    }

    #[test]
    fn tiny_levels_hit_the_erratum() {
        let (_t, ctx) = context(DriverConfig::default());
        let texture = allocated(
            &ctx,
            TextureGeometry::new(8, 8, PixelFormat::Rgba8888, MemoryLayout::Tiled).with_full_chain(),
        );
        let source = vec![0u8; 64 * 4];
        assert_eq!(
            rejection(&ctx, &texture, &UploadRequest::full(0, 2, &source, PixelFormat::Rgba8888, 8)),
            Some(RejectReason::BelowTileGranularity)
        );
        assert_eq!(
            rejection(&ctx, &texture, &UploadRequest::full(0, 4, &source, PixelFormat::Rgba8888, 8)),
            Some(RejectReason::OutOfBounds)
        );
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        let (_t, ctx) = context(DriverConfig::default());
        let source = vec![0u8; 16 * 16 * 16];
        let compressed = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Pvrtc4, MemoryLayout::Twiddled));
        assert_eq!(
            rejection(&ctx, &compressed, &UploadRequest::full(0, 0, &source, PixelFormat::Pvrtc4, 32)),
            Some(RejectReason::CompressedFormat)
        );
        let float = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Rgba16Float, MemoryLayout::Strided));
        assert_eq!(
            rejection(&ctx, &float, &UploadRequest::full(0, 0, &source, PixelFormat::Rgba16Float, 128)),
            Some(RejectReason::MultiChunkFormat)
        );
        let color = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
        assert_eq!(
            rejection(&ctx, &color, &UploadRequest::full(0, 0, &source, PixelFormat::Rgb565, 32)),
            Some(RejectReason::UnsupportedConversion {
                from: PixelFormat::Rgb565,
                to: PixelFormat::Rgba8888
            })
        );
    }

    #[test]
    fn source_rows_are_validated() {
        let (_t, ctx) = context(DriverConfig::default());
        let texture = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
        let source = vec![0u8; 16 * 16 * 4];
        assert_eq!(
            rejection(&ctx, &texture, &UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 60)),
            Some(RejectReason::UnrecognizedRowLayout)
        );
        assert_eq!(
            rejection(&ctx, &texture, &UploadRequest::full(0, 0, &source[..100], PixelFormat::Rgba8888, 64)),
            Some(RejectReason::SourceTooSmall)
        );
    }

    #[test]
    fn unallocated_texture_is_rejected_untouched() {
        let (_t, ctx) = context(DriverConfig::default());
        let texture = Texture::new(1, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
        let source = vec![0u8; 16 * 16 * 4];
        assert_eq!(
            rejection(&ctx, &texture, &UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 64)),
            Some(RejectReason::NoDeviceMemory)
        );
        assert_eq!(texture.allocation(), None);
    }

    #[test]
    fn disabled_engine_rejects_everything() {
        let (_t, ctx) = context(DriverConfig::builder().with_hwtq(false).build());
        let texture = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
        let source = vec![0u8; 16 * 16 * 4];
        assert_eq!(
            rejection(&ctx, &texture, &UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 64)),
            Some(RejectReason::HwtqDisabled)
        );
    }

    #[test]
    fn odd_pitch_is_repacked() {
        let (transport, ctx) = context(DriverConfig::default());
        let texture = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Rgb565, MemoryLayout::Strided));
        texture.specify_level(0, 0, None).expect("specify");
        //3 texels of 2 bytes, 6 bytes apart
        let source: Vec<u8> = (0..18).collect();
        let request = UploadRequest {
            region: Some(Rect::new(1, 1, 3, 3)),
            ..UploadRequest::full(0, 0, &source, PixelFormat::Rgb565, 6)
        };
        let descriptor = prepare_upload(&ctx, &texture, &request).expect("accepted");
        assert!(matches!(descriptor.src.memory, TransferMemory::Staging(_)));
        assert_eq!(descriptor.src.stride, 8);
        upload(&ctx, &descriptor).expect("submitted");
        assert_eq!(transport.transfers().len(), 1);

        let region = texture.level_region(0, 0).expect("allocated");
        let stride = texture.geometry().level_stride(0) as usize;
        let row = |y: usize| region.memory().read(region.offset as usize + y * stride + 2, 6).expect("row");
        assert_eq!(row(1), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(row(3), vec![12, 13, 14, 15, 16, 17]);
    }

    #[test]
    fn upload_texture_falls_back_after_submission_failure() {
        let (transport, ctx) = context(DriverConfig::default());
        let texture = Texture::new(1, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
        let source = vec![0x5Au8; 16 * 16 * 4];
        let request = UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 64);
        assert_eq!(upload_texture(&ctx, &texture, &request), Ok(UploadPath::Hardware));
        assert_eq!(texture.residency(0, 0), Some(Residency::Resident));

        transport.fail_next_submissions(1);
        assert_eq!(upload_texture(&ctx, &texture, &request), Ok(UploadPath::Software));
        let counts = ctx.share_group().stats().snapshot();
        assert_eq!(counts.hardware_uploads, 1);
        assert_eq!(counts.submission_failures, 1);
        assert_eq!(counts.software_uploads, 1);
        assert!(texture.sync().is_idle());
    }

    #[test]
    fn upload_lands_on_translated_contents() {
        let (_t, ctx) = context(DriverConfig::default());
        let texture = Texture::new(1, TextureGeometry::new(8, 8, PixelFormat::Rgba8888, MemoryLayout::Strided));
        texture.specify_level(0, 0, Some(vec![1u8; 8 * 8 * 4])).expect("specify");
        let source = vec![9u8; 4 * 4 * 4];
        let request = UploadRequest {
            region: Some(Rect::new(0, 0, 4, 4)),
            ..UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 16)
        };
        upload_texture(&ctx, &texture, &request).expect("upload");
        assert_eq!(texture.residency(0, 0), Some(Residency::Resident));
        let region = texture.level_region(0, 0).expect("allocated");
        let stride = texture.geometry().level_stride(0) as usize;
        let at = |x: usize, y: usize| region.memory().read(region.offset as usize + y * stride + x * 4, 1).expect("texel")[0];
        assert_eq!(at(0, 0), 9);
        assert_eq!(at(3, 3), 9);
        assert_eq!(at(4, 0), 1);
        assert_eq!(at(0, 7), 1);
    }
}
