// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Hardware and software transfer paths against the loopback transport.

use half::f16;
use render_surfaces::Error;
use render_surfaces::attachment::Attachable;
use render_surfaces::completeness::get_completeness;
use render_surfaces::config::DriverConfig;
use render_surfaces::context::{Context, ShareGroup};
use render_surfaces::framebuffer::{AttachmentSlot, DrawParams, FrameBuffer, FrameBufferStatus, Rotation};
use render_surfaces::layout::rules::FootprintViolation;
use render_surfaces::layout::{Extent, MemoryLayout, Rect, TextureGeometry};
use render_surfaces::lifecycle::{bind_attachment, renderbuffer_storage};
use render_surfaces::pixel_formats::{Conversion, PixelFormat};
use render_surfaces::sys::time::Duration;
use render_surfaces::texture::{Residency, Texture};
use render_surfaces::transfer::fallback::software_upload;
use render_surfaces::transfer::{
    BlitRequest, RejectReason, TransferError, UploadPath, UploadRequest, blit, prepare_normal_blit, prepare_upload,
    upload, upload_texture,
};
use render_surfaces::transport::TransportError;
use render_surfaces::transport::loopback::LoopbackTransport;
use std::sync::Arc;

fn setup(config: DriverConfig) -> (Arc<LoopbackTransport>, Context) {
    let transport = Arc::new(LoopbackTransport::new());
    let group = ShareGroup::new(transport.clone());
    (transport, Context::new(&group, config))
}

fn strided_renderbuffers() -> DriverConfig {
    DriverConfig::builder()
        .with_renderbuffer_layout(MemoryLayout::Strided)
        .build()
}

fn allocated(ctx: &Context, geometry: TextureGeometry) -> Arc<Texture> {
    let texture = Texture::new(1, geometry);
    texture.ensure_allocation(ctx.transport()).expect("allocation");
    texture
}

/// A complete drawable whose texel at memory `(x, y)` is `[x, y, 7, 255]`.
fn drawable(ctx: &Context, width: u32, height: u32) -> DrawParams {
    let color = Attachable::renderbuffer(1);
    renderbuffer_storage(ctx, &color, width, height, PixelFormat::Rgba8888, 0).expect("storage");
    let fb = FrameBuffer::new(1);
    bind_attachment(ctx, &fb, AttachmentSlot::Color, Some(color));
    assert_eq!(get_completeness(ctx, &fb), Ok(FrameBufferStatus::Complete));
    let draw = fb.draw_params().expect("complete");
    {
        let mut memory = draw.memory.memory().lock();
        for y in 0..height as usize {
            for x in 0..width as usize {
                let at = draw.memory.offset as usize + y * draw.stride as usize + x * 4;
                memory[at..at + 4].copy_from_slice(&[x as u8, y as u8, 7, 255]);
            }
        }
    }
    draw
}

fn texel(texture: &Texture, x: usize, y: usize) -> Vec<u8> {
    let region = texture.level_region(0, 0).expect("allocated");
    let stride = texture.geometry().level_stride(0) as usize;
    let bytes_per_texel = texture.geometry().format.bytes_per_texel() as usize;
    region
        .memory()
        .read(region.offset as usize + y * stride + x * bytes_per_texel, bytes_per_texel)
        .expect("texel")
}

#[test]
fn small_twiddled_upload_goes_to_software() {
    let (transport, ctx) = setup(DriverConfig::default());
    let texture = Texture::new(1, TextureGeometry::new(4, 4, PixelFormat::Rgba8888, MemoryLayout::Twiddled));
    let source: Vec<u8> = (0..64).collect();
    let request = UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 16);

    texture.ensure_allocation(ctx.transport()).expect("allocation");
    assert_eq!(
        prepare_upload(&ctx, &texture, &request).err(),
        Some(RejectReason::Footprint(FootprintViolation::TooSmall {
            minimum: Extent::new(7, 7)
        }))
    );

    assert_eq!(upload_texture(&ctx, &texture, &request), Ok(UploadPath::Software));
    assert_eq!(texture.residency(0, 0), Some(Residency::Resident));
    assert_eq!(texel(&texture, 0, 0), vec![0, 1, 2, 3]);
    assert_eq!(texel(&texture, 3, 3), vec![60, 61, 62, 63]);
    assert!(transport.transfers().is_empty());
    let counts = ctx.share_group().stats().snapshot();
    assert_eq!(counts.rejected, 2);
    assert_eq!(counts.software_uploads, 1);
    assert_eq!(counts.hardware_uploads, 0);
}

#[test]
fn hardware_upload_swaps_channels() {
    let (transport, ctx) = setup(DriverConfig::default());
    let texture = Texture::new(1, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
    let source: Vec<u8> = [1u8, 2, 3, 4].repeat(16 * 16);
    let request = UploadRequest::full(0, 0, &source, PixelFormat::Bgra8888, 64);

    assert_eq!(upload_texture(&ctx, &texture, &request), Ok(UploadPath::Hardware));
    let transfers = transport.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].conversion, Conversion::SwapRedBlue);
    assert_eq!(transfers[0].dst_rect, Rect::new(0, 0, 16, 16));
    assert_eq!(texel(&texture, 9, 12), vec![3, 2, 1, 4]);
    assert!(texture.sync().is_idle());
}

#[test]
fn float_narrowing_only_happens_in_software() {
    let (_transport, ctx) = setup(DriverConfig::default());
    let texture = Texture::new(1, TextureGeometry::new(8, 8, PixelFormat::Rgba16Float, MemoryLayout::Strided));
    let texel_bytes: Vec<u8> = [0.5f32, 1.0, -2.0, 0.25]
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect();
    let source = texel_bytes.repeat(8 * 8);
    let request = UploadRequest::full(0, 0, &source, PixelFormat::Rgba32Float, 8 * 16);

    assert_eq!(upload_texture(&ctx, &texture, &request), Ok(UploadPath::Software));
    let stored = texel(&texture, 5, 6);
    let channels: Vec<f32> = stored
        .chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
        .collect();
    assert_eq!(channels, vec![0.5, 1.0, -2.0, 0.25]);
}

#[test]
fn rotated_drawable_is_walked_in_logical_order() {
    let (transport, ctx) = setup(strided_renderbuffers());
    let mut src = drawable(&ctx, 32, 16);
    src.rotation = Rotation::Rotate90;
    let texture = allocated(&ctx, TextureGeometry::new(32, 32, PixelFormat::Rgba8888, MemoryLayout::Strided));
    let request = BlitRequest {
        face: 0,
        level: 0,
        dst_region: Some(Rect::new(0, 0, 16, 32)),
        src_region: Rect::new(0, 0, 16, 32),
    };
    let descriptor = prepare_normal_blit(&ctx, &texture, &request, &src).expect("accepted");
    blit(&ctx, &descriptor).expect("submitted");

    //destination (i, j) comes from memory (j, 15 - i)
    assert_eq!(texel(&texture, 0, 0), vec![0, 15, 7, 255]);
    assert_eq!(texel(&texture, 3, 20), vec![20, 12, 7, 255]);
    assert_eq!(texel(&texture, 15, 31), vec![31, 0, 7, 255]);
    //outside the destination region nothing was written
    assert_eq!(texel(&texture, 16, 0), vec![0, 0, 0, 0]);
    assert_eq!(transport.transfers()[0].rotation, Rotation::Rotate90);
    assert_eq!(ctx.share_group().stats().snapshot().hardware_blits, 1);
    assert!(src.surface.sync().is_idle());
}

#[test]
fn default_drawable_orientation_flips_rows() {
    let (_transport, ctx) = setup(strided_renderbuffers());
    let src = drawable(&ctx, 32, 32);
    assert_eq!(src.rotation, Rotation::FlipY);
    let texture = allocated(&ctx, TextureGeometry::new(32, 32, PixelFormat::Rgba8888, MemoryLayout::Strided));
    let request = BlitRequest {
        face: 0,
        level: 0,
        dst_region: None,
        src_region: Rect::new(0, 0, 32, 32),
    };
    let descriptor = prepare_normal_blit(&ctx, &texture, &request, &src).expect("accepted");
    blit(&ctx, &descriptor).expect("submitted");
    assert_eq!(texel(&texture, 5, 0), vec![5, 31, 7, 255]);
    assert_eq!(texel(&texture, 5, 31), vec![5, 0, 7, 255]);
}

#[test]
fn failed_blit_leaves_both_sides_idle() {
    let (transport, ctx) = setup(strided_renderbuffers());
    let src = drawable(&ctx, 32, 32);
    let texture = allocated(&ctx, TextureGeometry::new(32, 32, PixelFormat::Rgba8888, MemoryLayout::Strided));
    let request = BlitRequest {
        face: 0,
        level: 0,
        dst_region: None,
        src_region: Rect::new(0, 0, 32, 32),
    };
    let descriptor = prepare_normal_blit(&ctx, &texture, &request, &src).expect("accepted");
    transport.fail_next_submissions(1);
    assert_eq!(
        blit(&ctx, &descriptor),
        Err(TransferError::Submission(TransportError::SubmissionRejected))
    );
    assert!(texture.sync().is_idle());
    assert!(src.surface.sync().is_idle());
    assert!(transport.transfers().is_empty());
    assert_eq!(texel(&texture, 0, 0), vec![0, 0, 0, 0]);
    let counts = ctx.share_group().stats().snapshot();
    assert_eq!(counts.submission_failures, 1);
    assert_eq!(counts.hardware_blits, 0);

    //the same descriptor goes through once the transport recovers
    assert_eq!(blit(&ctx, &descriptor), Ok(()));
    assert_eq!(transport.transfers().len(), 1);
}

#[test]
fn software_path_waits_for_hardware_work() {
    let config = DriverConfig::builder()
        .with_sync_wait_budget(Duration::from_millis(5))
        .build();
    let (transport, ctx) = setup(config);
    let texture = allocated(&ctx, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
    texture.specify_level(0, 0, None).expect("level 0");
    let source = vec![0xEEu8; 16 * 16 * 4];
    let request = UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 64);

    transport.defer_completion(true);
    let descriptor = prepare_upload(&ctx, &texture, &request).expect("accepted");
    upload(&ctx, &descriptor).expect("submitted");
    assert!(!texture.sync().is_idle());
    assert_eq!(software_upload(&ctx, &texture, &request), Err(Error::HardwareBusy));

    transport.retire_all();
    assert_eq!(software_upload(&ctx, &texture, &request), Ok(()));
    assert_eq!(texel(&texture, 15, 15), vec![0xEE; 4]);
}

#[test]
fn disabled_engine_sends_everything_to_software() {
    let (transport, ctx) = setup(DriverConfig::builder().with_hwtq(false).build());
    let texture = Texture::new(1, TextureGeometry::new(16, 16, PixelFormat::Rgba8888, MemoryLayout::Strided));
    let source = vec![0x11u8; 16 * 16 * 4];
    let request = UploadRequest::full(0, 0, &source, PixelFormat::Rgba8888, 64);
    assert_eq!(upload_texture(&ctx, &texture, &request), Ok(UploadPath::Software));
    assert!(transport.transfers().is_empty());
    assert_eq!(texel(&texture, 0, 0), vec![0x11; 4]);
}
