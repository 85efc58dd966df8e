// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The software transfer path.

Always correct, never fast.  Pixels are converted by a [`PixelCodec`] supplied by the
platform; the crate ships [`RowCopyCodec`], which handles the pairings of the hardware
conversion table plus float narrowing and widening.
*/

use super::UploadRequest;
use crate::context::Context;
use crate::error::Error;
use crate::layout::Rect;
use crate::pixel_formats::{Conversion, PixelFormat, hardware_conversion};
use crate::sync::poll_until_complete;
use crate::texture::Texture;
use half::f16;
use std::fmt::Debug;

/// Bytes in one packed row of `width` texels, or of one row of blocks for compressed formats.
pub fn packed_row_bytes(format: PixelFormat, width: u32) -> u32 {
    match format.block() {
        Some(block) => width.div_ceil(block.width()) * format.bytes_per_texel(),
        None => width * format.bytes_per_texel(),
    }
}

/// Rows of memory an image `height` texels tall occupies: texel rows, or block rows.
pub fn row_count(format: PixelFormat, height: u32) -> u32 {
    match format.block() {
        Some(block) => height.div_ceil(block.height()),
        None => height,
    }
}

/// Arguments of one [`PixelCodec::convert`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecRequest {
    pub src_format: PixelFormat,
    pub dst_format: PixelFormat,
    /// Size of the region in texels.
    pub width: u32,
    pub height: u32,
    pub src_stride: u32,
    /// Mip level being written, for codecs that care.
    pub level: u32,
    /// Row pitch of `dst`.  `None` packs rows tightly.
    pub dst_stride: Option<u32>,
}

impl CodecRequest {
    pub fn dst_row_pitch(&self) -> u32 {
        self.dst_stride
            .unwrap_or_else(|| packed_row_bytes(self.dst_format, self.width))
    }
}

/**
Converts pixel rows between formats on the CPU.

`convert` writes `request.height` rows of `request.width` texels into `dst`, starting at `dst[0]`
and `request.dst_row_pitch()` bytes apart, reading rows `request.src_stride` bytes apart from
`src`.  Callers check [`PixelCodec::supports`] first and size both slices to cover the region.
*/
pub trait PixelCodec: Send + Sync + Debug {
    fn supports(&self, src_format: PixelFormat, dst_format: PixelFormat) -> bool;

    fn convert(&self, dst: &mut [u8], src: &[u8], request: &CodecRequest);
}

/// A conversion as the CPU performs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowConversion {
    Bytes(Conversion),
    /// 32-bit float channels to 16-bit.
    NarrowFloat,
    /// 16-bit float channels to 32-bit.
    WidenFloat,
}

fn row_conversion(src_format: PixelFormat, dst_format: PixelFormat) -> Option<RowConversion> {
    match (src_format, dst_format) {
        (PixelFormat::Rgba32Float, PixelFormat::Rgba16Float) => Some(RowConversion::NarrowFloat),
        (PixelFormat::Rgba16Float, PixelFormat::Rgba32Float) => Some(RowConversion::WidenFloat),
        _ if src_format.bytes_per_texel() == dst_format.bytes_per_texel() => {
            hardware_conversion(src_format, dst_format).map(RowConversion::Bytes)
        }
        _ => None,
    }
}

fn convert_row(conversion: RowConversion, out: &mut [u8], input: &[u8], bytes_per_texel: usize, compressed: bool) {
    match conversion {
        RowConversion::Bytes(conversion) => {
            out.copy_from_slice(input);
            if !compressed {
                for texel in out.chunks_exact_mut(bytes_per_texel) {
                    conversion.apply(texel);
                }
            }
        }
        RowConversion::NarrowFloat => {
            for (half_bytes, single) in out.chunks_exact_mut(2).zip(input.chunks_exact(4)) {
                if let [a, b, c, d] = *single {
                    let value = f16::from_f32(f32::from_le_bytes([a, b, c, d]));
                    half_bytes.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        RowConversion::WidenFloat => {
            for (single, half_bytes) in out.chunks_exact_mut(4).zip(input.chunks_exact(2)) {
                if let [a, b] = *half_bytes {
                    let value = f16::from_le_bytes([a, b]).to_f32();
                    single.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
}

/// Copies rows, applying the byte rearrangements of [`hardware_conversion`].  Also narrows and
/// widens between the float formats, which the hardware cannot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCopyCodec;

impl PixelCodec for RowCopyCodec {
    fn supports(&self, src_format: PixelFormat, dst_format: PixelFormat) -> bool {
        row_conversion(src_format, dst_format).is_some()
    }

    fn convert(&self, dst: &mut [u8], src: &[u8], request: &CodecRequest) {
        let Some(conversion) = row_conversion(request.src_format, request.dst_format) else {
            debug_assert!(false, "unsupported conversion reached the codec");
            return;
        };
        let src_row_bytes = packed_row_bytes(request.src_format, request.width) as usize;
        let dst_row_bytes = packed_row_bytes(request.dst_format, request.width) as usize;
        let dst_pitch = request.dst_row_pitch() as usize;
        let src_pitch = request.src_stride as usize;
        for row in 0..row_count(request.dst_format, request.height) as usize {
            let (Some(out), Some(input)) = (
                dst.get_mut(row * dst_pitch..row * dst_pitch + dst_row_bytes),
                src.get(row * src_pitch..row * src_pitch + src_row_bytes),
            ) else {
                debug_assert!(false, "codec row {row} outside the buffers");
                return;
            };
            convert_row(
                conversion,
                out,
                input,
                request.dst_format.bytes_per_texel() as usize,
                request.dst_format.is_compressed(),
            );
        }
    }
}

/// Rows of source texels in application or staging memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRows<'a> {
    pub bytes: &'a [u8],
    pub format: PixelFormat,
    /// Bytes from one row to the next.
    pub stride: u32,
}

/**
Writes `rect` of `(face, level)` on the CPU.

Waits, within the context's budget, for hardware work on the texture to finish first.
Compressed levels are written whole.
*/
pub(crate) fn write_level_region(
    ctx: &Context,
    texture: &Texture,
    (face, level): (u32, u32),
    rect: Rect,
    source: SourceRows<'_>,
) -> Result<(), Error> {
    let geometry = *texture.geometry();
    let extent = geometry.level_extent(level);
    let invalid = Error::InvalidRegion { face, level };
    if rect.is_empty() || !rect.fits_in(extent) {
        return Err(invalid);
    }
    if geometry.format.is_compressed() && rect != extent.full_rect() {
        return Err(invalid);
    }
    let codec = ctx.codec();
    if !codec.supports(source.format, geometry.format) {
        return Err(Error::UnsupportedConversion {
            from: source.format,
            to: geometry.format,
        });
    }
    let rows = row_count(geometry.format, rect.height) as usize;
    let row_bytes = packed_row_bytes(source.format, rect.width) as usize;
    let src_stride = source.stride as usize;
    if src_stride < row_bytes || source.bytes.len() < (rows - 1) * src_stride + row_bytes {
        return Err(invalid);
    }

    texture.ensure_allocation(ctx.transport())?;
    let region = texture
        .level_region(face, level)
        .ok_or(Error::LevelNotSpecified { face, level })?;
    if !poll_until_complete(ctx.transport(), &texture.sync(), ctx.config().sync_wait_budget) {
        return Err(Error::HardwareBusy);
    }

    let dst_stride = if geometry.format.is_compressed() {
        packed_row_bytes(geometry.format, extent.width)
    } else {
        geometry.level_stride(level)
    };
    let start = region.offset as usize
        + (rect.y as usize) * dst_stride as usize
        + (rect.x as usize) * geometry.format.bytes_per_texel() as usize;
    let end = start + (rows - 1) * dst_stride as usize + packed_row_bytes(geometry.format, rect.width) as usize;
    let mut memory = region.memory().lock();
    let Some(dst) = memory.get_mut(start..end) else {
        debug_assert!(false, "level region outside its allocation");
        return Err(Error::Internal("level region outside its allocation"));
    };
    codec.convert(
        dst,
        source.bytes,
        &CodecRequest {
            src_format: source.format,
            dst_format: geometry.format,
            width: rect.width,
            height: rect.height,
            src_stride: source.stride,
            level,
            dst_stride: Some(dst_stride),
        },
    );
    Ok(())
}

/// Performs an upload on the CPU.  Does not change the level's residency.
pub fn software_upload(ctx: &Context, texture: &Texture, request: &UploadRequest<'_>) -> Result<(), Error> {
    let extent = texture.geometry().level_extent(request.level);
    let rect = request.region.unwrap_or(extent.full_rect());
    write_level_region(
        ctx,
        texture,
        (request.face, request.level),
        rect,
        SourceRows {
            bytes: request.source,
            format: request.source_format,
            stride: request.source_stride,
        },
    )?;
    ctx.share_group().stats().software_upload();
    logwise::trace_sync!(
        "software upload into texture {name} level {level}",
        name = texture.name(),
        level = request.level
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::context::ShareGroup;
    use crate::layout::{MemoryLayout, TextureGeometry};
    use crate::transport::loopback::LoopbackTransport;
    use std::sync::Arc;

    fn context() -> Context {
        let group = ShareGroup::new(Arc::new(LoopbackTransport::new()));
        Context::new(&group, DriverConfig::default())
    }

    #[test]
    fn compressed_rows_are_block_rows() {
        assert_eq!(packed_row_bytes(PixelFormat::Pvrtc2, 17), 3 * 8);
        assert_eq!(packed_row_bytes(PixelFormat::Etc1, 4), 8);
        assert_eq!(row_count(PixelFormat::Etc1, 9), 3);
        assert_eq!(packed_row_bytes(PixelFormat::Rgb565, 5), 10);
    }

    #[test]
    fn row_copy_swaps_channels() {
        let request = CodecRequest {
            src_format: PixelFormat::Rgba8888,
            dst_format: PixelFormat::Bgra8888,
            width: 1,
            height: 2,
            src_stride: 8,
            level: 0,
            dst_stride: None,
        };
        let src = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8];
        let mut dst = [0u8; 8];
        RowCopyCodec.convert(&mut dst, &src, &request);
        assert_eq!(dst, [3, 2, 1, 4, 7, 6, 5, 8]);
        assert!(!RowCopyCodec.supports(PixelFormat::Rgb565, PixelFormat::A8));
    }

    #[test]
    fn float_rows_are_narrowed() {
        let request = CodecRequest {
            src_format: PixelFormat::Rgba32Float,
            dst_format: PixelFormat::Rgba16Float,
            width: 1,
            height: 1,
            src_stride: 16,
            level: 0,
            dst_stride: None,
        };
        let src: Vec<u8> = [1.0f32, 0.5, -2.0, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut dst = [0u8; 8];
        RowCopyCodec.convert(&mut dst, &src, &request);
        let channels: Vec<f32> = dst
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect();
        assert_eq!(channels, vec![1.0, 0.5, -2.0, 0.0]);
        assert!(RowCopyCodec.supports(PixelFormat::Rgba16Float, PixelFormat::Rgba32Float));
    }

    #[test]
    fn software_upload_writes_subregion() {
        let ctx = context();
        let texture = Texture::new(
            1,
            TextureGeometry::new(8, 8, PixelFormat::Rgba8888, MemoryLayout::Strided),
        );
        texture.specify_level(0, 0, None).expect("specify");
        let source = vec![0xAB; 2 * 2 * 4];
        let request = UploadRequest {
            region: Some(Rect::new(2, 3, 2, 2)),
            ..UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 8)
        };
        software_upload(&ctx, &texture, &request).expect("upload");
        let region = texture.level_region(0, 0).expect("allocated");
        let stride = texture.geometry().level_stride(0) as usize;
        let memory = region.memory().lock();
        let at = |x: usize, y: usize| memory[region.offset as usize + y * stride + x * 4];
        assert_eq!(at(2, 3), 0xAB);
        assert_eq!(at(3, 4), 0xAB);
        assert_eq!(at(1, 3), 0);
        assert_eq!(at(2, 5), 0);
        assert_eq!(ctx.share_group().stats().snapshot().software_uploads, 1);
    }

    #[test]
    fn short_source_is_rejected() {
        let ctx = context();
        let texture = Texture::new(
            1,
            TextureGeometry::new(8, 8, PixelFormat::Rgba8888, MemoryLayout::Strided),
        );
        let source = vec![0; 10];
        let request = UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 32);
        assert_eq!(
            software_upload(&ctx, &texture, &request),
            Err(Error::InvalidRegion { face: 0, level: 0 })
        );
    }
}
