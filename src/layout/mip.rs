// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Mip-chain offset arithmetic.
//!
//! Pure functions; callers guarantee non-zero top dimensions.  Every level halves both
//! dimensions with floor and clamps at 1, so the recursion always terminates on a 1x1 level.

use super::TextureGeometry;
use crate::bittricks::{align_up, align_up_u64, halve};

/// Offset in pixels of `level` in a tightly packed chain with the given top level.
pub fn mip_offset(level: u32, top_width: u32, top_height: u32) -> u64 {
    let (mut width, mut height) = (top_width, top_height);
    let mut offset = 0u64;
    for _ in 0..level {
        offset += width as u64 * height as u64;
        width = halve(width);
        height = halve(height);
    }
    offset
}

/// Offset in blocks of `level` in a compressed chain.
///
/// Each level is padded to whole blocks (4x4, or 8x4 when `block_is_wide`) before it is summed,
/// and the final pixel offset is divided by the block area.
pub fn compressed_mip_offset(level: u32, top_width: u32, top_height: u32, block_is_wide: bool) -> u64 {
    let block_width = if block_is_wide { 8 } else { 4 };
    let block_height = 4;
    let (mut width, mut height) = (top_width, top_height);
    let mut pixels = 0u64;
    for _ in 0..level {
        pixels += align_up(width, block_width) as u64 * align_up(height, block_height) as u64;
        width = halve(width);
        height = halve(height);
    }
    pixels / (block_width * block_height) as u64
}

/// Offset in pixels of `level` for a texture whose top level carries layout padding.
///
/// A non-power-of-two top level does not pack tightly the way a power-of-two chain does, so the
/// top is first rounded to the layout's alignment and the halving runs on the padded size.
pub fn npot_mip_offset(level: u32, geometry: &TextureGeometry) -> u64 {
    let top = geometry.stored_top_extent();
    mip_offset(level, top.width, top.height)
}

/// Byte offset of cube `face` from the start of the texture allocation.
///
/// When the texture is mip-mapped and its top level is larger than the layout's no-align
/// threshold, every face is padded to [`super::rules::CUBE_FACE_ALIGNMENT`] so neighbouring faces
/// never share a cache line.
pub fn cube_face_offset(face: u32, geometry: &TextureGeometry) -> u64 {
    if face == 0 {
        return 0;
    }
    let mut face_size = geometry.chain_byte_size();
    let threshold = geometry.rules().cube_no_align_threshold;
    if geometry.is_mipmapped() && geometry.width.max(geometry.height) > threshold {
        face_size = align_up_u64(face_size, super::rules::CUBE_FACE_ALIGNMENT);
    }
    face_size * face as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MemoryLayout;
    use crate::pixel_formats::PixelFormat;

    #[test]
    fn offsets_of_square_chain() {
        assert_eq!(mip_offset(0, 8, 8), 0);
        assert_eq!(mip_offset(1, 8, 8), 64);
        assert_eq!(mip_offset(2, 8, 8), 64 + 16);
        assert_eq!(mip_offset(4, 8, 8), 64 + 16 + 4 + 1);
        //past the 1x1 level every step adds a single pixel
        assert_eq!(mip_offset(6, 8, 8), 64 + 16 + 4 + 1 + 1 + 1);
    }

    /// offset(L+1) - offset(L) is the area of level L.
    #[test]
    fn consecutive_offsets_differ_by_level_area() {
        for (w, h) in [(1, 1), (7, 3), (64, 64), (640, 480), (1, 1024), (513, 2)] {
            let (mut lw, mut lh) = (w, h);
            for level in 0..14 {
                let delta = mip_offset(level + 1, w, h) - mip_offset(level, w, h);
                assert_eq!(delta, lw as u64 * lh as u64, "{w}x{h} level {level}");
                lw = halve(lw);
                lh = halve(lh);
            }
        }
    }

    #[test]
    fn compressed_offsets_pad_to_blocks() {
        //16x16 square blocks: 16 blocks, then 4, then one padded block per level
        assert_eq!(compressed_mip_offset(1, 16, 16, false), 16);
        assert_eq!(compressed_mip_offset(2, 16, 16, false), 20);
        assert_eq!(compressed_mip_offset(3, 16, 16, false), 21);
        assert_eq!(compressed_mip_offset(5, 16, 16, false), 23);
        //wide blocks are 8x4
        assert_eq!(compressed_mip_offset(1, 16, 16, true), 8);
        assert_eq!(compressed_mip_offset(2, 16, 16, true), 10);
    }

    #[test]
    fn npot_rounds_top_before_halving() {
        let geometry = TextureGeometry {
            width: 5,
            height: 3,
            format: PixelFormat::Rgb565,
            layout: MemoryLayout::Twiddled,
            levels: 3,
            faces: 1,
        };
        //padded to 8x4, then 4x2
        assert_eq!(npot_mip_offset(1, &geometry), 32);
        assert_eq!(npot_mip_offset(2, &geometry), 40);
        let tiled = TextureGeometry {
            layout: MemoryLayout::Tiled,
            ..geometry
        };
        assert_eq!(npot_mip_offset(1, &tiled), 32 * 32);
    }

    #[test]
    fn cube_faces_are_strictly_increasing() {
        for layout in [MemoryLayout::Strided, MemoryLayout::Tiled, MemoryLayout::Twiddled] {
            for (w, levels) in [(4, 1), (4, 3), (64, 7), (100, 1), (100, 7)] {
                let geometry = TextureGeometry {
                    width: w,
                    height: w,
                    format: PixelFormat::Rgba8888,
                    layout,
                    levels,
                    faces: 6,
                };
                assert_eq!(cube_face_offset(0, &geometry), 0);
                for face in 1..6 {
                    assert!(
                        cube_face_offset(face + 1, &geometry) > cube_face_offset(face, &geometry),
                        "{layout:?} {w} levels {levels}"
                    );
                }
            }
        }
    }

    #[test]
    fn small_or_unmipped_faces_skip_alignment() {
        let geometry = TextureGeometry {
            width: 4,
            height: 4,
            format: PixelFormat::Rgba8888,
            layout: MemoryLayout::Twiddled,
            levels: 3,
            faces: 6,
        };
        //4x4 + 2x2 + 1x1, no alignment below the threshold
        assert_eq!(cube_face_offset(1, &geometry), (16 + 4 + 1) * 4);
        let big = TextureGeometry {
            width: 64,
            height: 64,
            levels: 1,
            ..geometry
        };
        assert_eq!(cube_face_offset(2, &big), 2 * 64 * 64 * 4);
    }
}
