// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Memory layouts and mip-chain geometry.
//!
//! The hardware addresses pixels in one of three mutually incompatible ways:
//!
//! - **strided**: plain rows, each row padded to a stride granularity
//! - **tiled**: 32x32 tiles, both dimensions padded to the tile size
//! - **twiddled**: power-of-two Morton order, both dimensions padded to a power of two
//!   (hybrid-twiddled uses the same padding with a different texel walk)
//!
//! [`mip`] holds the pure offset arithmetic, [`rules`] holds the per-layout strategy tables.
//! [`TextureGeometry`] ties them together for a concrete texture so that the texture,
//! completeness and transfer code all agree on where a level lives.

pub mod mip;
pub mod rules;

use crate::pixel_formats::PixelFormat;

pub use rules::LayoutRules;

/// Pixel addressing scheme of an image in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    Strided,
    Tiled,
    Twiddled,
    HybridTwiddled,
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Extent { width, height }
    }
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
    /// The rectangle covering the whole extent.
    pub const fn full_rect(self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// A pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Rect { x, y, width, height }
    }
    pub const fn extent(self) -> Extent {
        Extent::new(self.width, self.height)
    }
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
    pub const fn area(self) -> u64 {
        self.extent().area()
    }
    /// Whether the rectangle lies entirely inside `bounds`.
    pub const fn fits_in(self, bounds: Extent) -> bool {
        (self.x as u64 + self.width as u64) <= bounds.width as u64
            && (self.y as u64 + self.height as u64) <= bounds.height as u64
    }
    /// Intersection with `0..bounds`.  May be empty.
    pub fn clamp_to(self, bounds: Extent) -> Rect {
        let x = self.x.min(bounds.width);
        let y = self.y.min(bounds.height);
        let right = self.x.saturating_add(self.width).min(bounds.width);
        let bottom = self.y.saturating_add(self.height).min(bounds.height);
        Rect::new(x, y, right - x, bottom - y)
    }
}

/**
Everything the layout math needs to know about a texture.

Separated from [`crate::texture::Texture`] so the arithmetic stays pure and testable without
allocating anything.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub layout: MemoryLayout,
    /// Number of mip levels, at least 1.
    pub levels: u32,
    /// 1 for 2D textures, 6 for cube maps.
    pub faces: u32,
}

impl TextureGeometry {
    /// A single-level 2D texture.
    pub const fn new(width: u32, height: u32, format: PixelFormat, layout: MemoryLayout) -> Self {
        TextureGeometry {
            width,
            height,
            format,
            layout,
            levels: 1,
            faces: 1,
        }
    }

    pub const fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    /// Every level down to 1x1.
    pub const fn with_full_chain(mut self) -> Self {
        let largest = if self.width > self.height { self.width } else { self.height };
        self.levels = u32::BITS - largest.leading_zeros();
        self
    }

    pub const fn cube(mut self) -> Self {
        self.faces = 6;
        self
    }

    /// Number of `(face, level)` images.
    pub const fn image_count(&self) -> usize {
        (self.faces * self.levels) as usize
    }

    pub const fn is_mipmapped(&self) -> bool {
        self.levels > 1
    }

    pub fn rules(&self) -> &'static LayoutRules {
        self.layout.rules()
    }

    /// Logical size of `level`.
    pub const fn level_extent(&self, level: u32) -> Extent {
        Extent::new(
            crate::bittricks::level_dimension(self.width, level),
            crate::bittricks::level_dimension(self.height, level),
        )
    }

    /// Top level as it is actually stored, after layout padding.
    pub fn stored_top_extent(&self) -> Extent {
        self.rules().round_extent(Extent::new(self.width, self.height))
    }

    /// Size of `level` as stored: the padded top level halved `level` times.
    pub fn stored_level_extent(&self, level: u32) -> Extent {
        let top = self.stored_top_extent();
        Extent::new(
            crate::bittricks::level_dimension(top.width, level),
            crate::bittricks::level_dimension(top.height, level),
        )
    }

    /// Bytes per row of `level`.  Zero for compressed formats, which have no row stride.
    pub fn level_stride(&self, level: u32) -> u32 {
        if self.format.is_compressed() {
            return 0;
        }
        self.stored_level_extent(level).width * self.format.bytes_per_texel()
    }

    /// Byte offset of `level` from the start of its face.
    pub fn level_offset_in_face(&self, level: u32) -> u64 {
        match self.format.block() {
            Some(block) => {
                mip::compressed_mip_offset(level, self.width, self.height, block.is_wide())
                    * self.format.bytes_per_texel() as u64
            }
            None => self.pixel_offset(level) * self.format.bytes_per_texel() as u64,
        }
    }

    fn pixel_offset(&self, level: u32) -> u64 {
        if self.stored_top_extent() == Extent::new(self.width, self.height) {
            mip::mip_offset(level, self.width, self.height)
        } else {
            mip::npot_mip_offset(level, self)
        }
    }

    /// Bytes occupied by `level`.
    pub fn level_byte_size(&self, level: u32) -> u64 {
        if !self.is_mipmapped() && level == 0 && !self.format.is_compressed() {
            //single-level shortcut; must agree with the general recursion below
            return self.stored_top_extent().area() * self.format.bytes_per_texel() as u64;
        }
        self.level_offset_in_face(level + 1) - self.level_offset_in_face(level)
    }

    /// Bytes of one face's whole mip chain, before cube-face alignment.
    pub fn chain_byte_size(&self) -> u64 {
        self.level_offset_in_face(self.levels)
    }

    /// Bytes of one face including the cube-face alignment, if it applies.
    pub fn face_byte_size(&self) -> u64 {
        mip::cube_face_offset(1, self)
    }

    /// Bytes of the whole allocation backing every face.
    pub fn total_byte_size(&self) -> u64 {
        mip::cube_face_offset(self.faces, self)
    }

    /// Byte offset of `(face, level)` from the start of the texture allocation.
    pub fn level_byte_offset(&self, face: u32, level: u32) -> u64 {
        mip::cube_face_offset(face, self) + self.level_offset_in_face(level)
    }

    /// Distance between the chunk planes of a multi-chunk `level`; zero for single-chunk formats.
    pub fn chunk_stride(&self, level: u32) -> u64 {
        let chunks = self.format.chunk_count() as u64;
        if chunks <= 1 {
            return 0;
        }
        self.level_byte_size(level) / chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: u32, height: u32, layout: MemoryLayout, levels: u32) -> TextureGeometry {
        TextureGeometry {
            width,
            height,
            format: PixelFormat::Rgba8888,
            layout,
            levels,
            faces: 1,
        }
    }

    #[test]
    fn full_chain_ends_at_one_pixel() {
        let g = TextureGeometry::new(64, 16, PixelFormat::Rgb565, MemoryLayout::Twiddled).with_full_chain();
        assert_eq!(g.levels, 7);
        assert_eq!(g.level_extent(6), Extent::new(1, 1));
        assert_eq!(TextureGeometry::new(1, 1, PixelFormat::A8, MemoryLayout::Strided).with_full_chain().levels, 1);
        assert_eq!(g.cube().image_count(), 42);
    }

    #[test]
    fn rect_clamp() {
        let bounds = Extent::new(10, 10);
        assert_eq!(Rect::new(8, 8, 4, 4).clamp_to(bounds), Rect::new(8, 8, 2, 2));
        assert!(Rect::new(12, 0, 4, 4).clamp_to(bounds).is_empty());
        assert!(Rect::new(0, 0, 10, 10).fits_in(bounds));
        assert!(!Rect::new(1, 0, 10, 10).fits_in(bounds));
    }

    #[test]
    fn level_sizes_sum_to_chain() {
        let g = geometry(64, 32, MemoryLayout::Twiddled, 7);
        let summed: u64 = (0..g.levels).map(|l| g.level_byte_size(l)).sum();
        assert_eq!(summed, g.chain_byte_size());
        assert_eq!(g.level_byte_size(0), 64 * 32 * 4);
        assert_eq!(g.level_byte_size(6), 4);
    }

    /// The single-level shortcut and the general recursion must agree for every layout,
    /// including non-power-of-two tops where padding applies.
    #[test]
    fn single_level_shortcut_agrees_with_recursion() {
        for layout in [
            MemoryLayout::Strided,
            MemoryLayout::Tiled,
            MemoryLayout::Twiddled,
            MemoryLayout::HybridTwiddled,
        ] {
            for (w, h) in [(1, 1), (3, 5), (17, 9), (64, 64), (100, 30), (33, 1)] {
                let g = geometry(w, h, layout, 1);
                let shortcut = g.level_byte_size(0);
                let general = g.level_offset_in_face(1) - g.level_offset_in_face(0);
                assert_eq!(shortcut, general, "{layout:?} {w}x{h}");
            }
        }
    }

    #[test]
    fn npot_strided_stride_is_padded() {
        let g = geometry(100, 10, MemoryLayout::Strided, 1);
        assert_eq!(g.level_stride(0), 128 * 4);
        let tiled = geometry(100, 10, MemoryLayout::Tiled, 1);
        assert_eq!(tiled.stored_top_extent(), Extent::new(128, 32));
    }

    #[test]
    fn chunk_stride_splits_planes() {
        let mut g = geometry(16, 16, MemoryLayout::Strided, 1);
        g.format = PixelFormat::Rgba32Float;
        assert_eq!(g.chunk_stride(0), 16 * 16 * 4);
        g.format = PixelFormat::Rgb565;
        assert_eq!(g.chunk_stride(0), 0);
    }

    #[test]
    fn cube_offsets() {
        let mut g = geometry(64, 64, MemoryLayout::Twiddled, 7);
        g.faces = 6;
        assert_eq!(g.level_byte_offset(0, 0), 0);
        assert_eq!(g.level_byte_offset(1, 0), g.face_byte_size());
        assert_eq!(g.total_byte_size(), 6 * g.face_byte_size());
        assert_eq!(g.face_byte_size() % rules::CUBE_FACE_ALIGNMENT, 0);
    }
}
