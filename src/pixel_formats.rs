// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Hardware pixel format tags and their storage descriptors.
//!
//! Every texture level, renderbuffer and render surface carries one [`PixelFormat`].  The
//! completeness engine needs to know which formats are color, depth or stencil renderable and
//! how many bits each channel has; the layout math needs bytes per texel (or per block for
//! compressed formats); the transfer engine needs the chunk count, because multi-chunk formats
//! (float and packed depth-stencil) are stored as separate planes that the engine cannot move.
//!
//! # Examples
//!
//! ```
//! use render_surfaces::pixel_formats::{FormatClass, PixelFormat};
//!
//! let format = PixelFormat::Rgb565;
//! assert_eq!(format.bytes_per_texel(), 2);
//! assert_eq!(format.class(), FormatClass::Color);
//! assert!(!format.is_compressed());
//! ```

/*
Unlike the shader-facing formats of a middleware crate, these are plain enum tags: the driver
receives them at runtime from the API layer, so there is nothing to gain from encoding them in
the type system.
*/

/// Pixel format of a texture level, renderbuffer or render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
    /// 32-bit color with an unused alpha byte.
    Rgbx8888,
    Rgb565,
    Rgba4444,
    Rgba5551,
    A8,
    L8,
    La88,
    /// Two 32-bit chunks per texel.
    Rgba16Float,
    /// Four 32-bit chunks per texel.
    Rgba32Float,
    Depth16,
    /// 24-bit depth stored in a 32-bit container.
    Depth24,
    Stencil8,
    /// Separate depth and stencil planes.
    Depth24Stencil8,
    /// 2bpp compressed, 8x4 blocks.
    Pvrtc2,
    /// 4bpp compressed, 4x4 blocks.
    Pvrtc4,
    /// 4x4 blocks.
    Etc1,
}

/// What an attachment of this format can be bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatClass {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

/// Compressed block footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockShape {
    /// 4x4 texels.
    Square,
    /// 8x4 texels.
    Wide,
}

impl BlockShape {
    pub const fn width(self) -> u32 {
        match self {
            BlockShape::Square => 4,
            BlockShape::Wide => 8,
        }
    }
    pub const fn height(self) -> u32 {
        4
    }
    pub const fn area(self) -> u32 {
        self.width() * self.height()
    }
    pub const fn is_wide(self) -> bool {
        matches!(self, BlockShape::Wide)
    }
}

/// Bit depth of every channel; zero for absent channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelBits {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
    pub depth: u8,
    pub stencil: u8,
}

impl ChannelBits {
    const fn color(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        ChannelBits { red, green, blue, alpha, depth: 0, stencil: 0 }
    }
    const fn depth_stencil(depth: u8, stencil: u8) -> Self {
        ChannelBits { red: 0, green: 0, blue: 0, alpha: 0, depth, stencil }
    }
}

/// Storage description of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatDescriptor {
    /// Bytes per texel, or bytes per block when `block` is set.
    pub bytes_per_texel: u8,
    pub chunk_count: u8,
    pub block: Option<BlockShape>,
    pub class: FormatClass,
    pub bits: ChannelBits,
}

impl FormatDescriptor {
    const fn plain(bytes_per_texel: u8, class: FormatClass, bits: ChannelBits) -> Self {
        FormatDescriptor { bytes_per_texel, chunk_count: 1, block: None, class, bits }
    }
    const fn compressed(bytes_per_block: u8, block: BlockShape, bits: ChannelBits) -> Self {
        FormatDescriptor {
            bytes_per_texel: bytes_per_block,
            chunk_count: 1,
            block: Some(block),
            class: FormatClass::Color,
            bits,
        }
    }
    const fn chunked(bytes_per_texel: u8, chunk_count: u8, class: FormatClass, bits: ChannelBits) -> Self {
        FormatDescriptor { bytes_per_texel, chunk_count, block: None, class, bits }
    }
    pub const fn is_compressed(&self) -> bool {
        self.block.is_some()
    }
}

impl PixelFormat {
    pub const fn descriptor(self) -> FormatDescriptor {
        use FormatClass::*;
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => {
                FormatDescriptor::plain(4, Color, ChannelBits::color(8, 8, 8, 8))
            }
            PixelFormat::Rgbx8888 => FormatDescriptor::plain(4, Color, ChannelBits::color(8, 8, 8, 0)),
            PixelFormat::Rgb565 => FormatDescriptor::plain(2, Color, ChannelBits::color(5, 6, 5, 0)),
            PixelFormat::Rgba4444 => FormatDescriptor::plain(2, Color, ChannelBits::color(4, 4, 4, 4)),
            PixelFormat::Rgba5551 => FormatDescriptor::plain(2, Color, ChannelBits::color(5, 5, 5, 1)),
            PixelFormat::A8 => FormatDescriptor::plain(1, Color, ChannelBits::color(0, 0, 0, 8)),
            PixelFormat::L8 => FormatDescriptor::plain(1, Color, ChannelBits::color(8, 8, 8, 0)),
            PixelFormat::La88 => FormatDescriptor::plain(2, Color, ChannelBits::color(8, 8, 8, 8)),
            PixelFormat::Rgba16Float => {
                FormatDescriptor::chunked(8, 2, Color, ChannelBits::color(16, 16, 16, 16))
            }
            PixelFormat::Rgba32Float => {
                FormatDescriptor::chunked(16, 4, Color, ChannelBits::color(32, 32, 32, 32))
            }
            PixelFormat::Depth16 => FormatDescriptor::plain(2, Depth, ChannelBits::depth_stencil(16, 0)),
            PixelFormat::Depth24 => FormatDescriptor::plain(4, Depth, ChannelBits::depth_stencil(24, 0)),
            PixelFormat::Stencil8 => FormatDescriptor::plain(1, Stencil, ChannelBits::depth_stencil(0, 8)),
            PixelFormat::Depth24Stencil8 => {
                FormatDescriptor::chunked(8, 2, DepthStencil, ChannelBits::depth_stencil(24, 8))
            }
            PixelFormat::Pvrtc2 => {
                FormatDescriptor::compressed(8, BlockShape::Wide, ChannelBits::color(8, 8, 8, 8))
            }
            PixelFormat::Pvrtc4 => {
                FormatDescriptor::compressed(8, BlockShape::Square, ChannelBits::color(8, 8, 8, 8))
            }
            PixelFormat::Etc1 => {
                FormatDescriptor::compressed(8, BlockShape::Square, ChannelBits::color(8, 8, 8, 0))
            }
        }
    }

    pub const fn bytes_per_texel(self) -> u32 {
        self.descriptor().bytes_per_texel as u32
    }
    pub const fn chunk_count(self) -> u32 {
        self.descriptor().chunk_count as u32
    }
    pub const fn is_compressed(self) -> bool {
        self.descriptor().is_compressed()
    }
    pub const fn block(self) -> Option<BlockShape> {
        self.descriptor().block
    }
    pub const fn class(self) -> FormatClass {
        self.descriptor().class
    }
    pub const fn bits(self) -> ChannelBits {
        self.descriptor().bits
    }

    /// Whether the hardware can render into this format as a color target.
    ///
    /// Compressed and multi-chunk float formats are sampled only.
    pub const fn is_color_renderable(self) -> bool {
        let descriptor = self.descriptor();
        matches!(descriptor.class, FormatClass::Color)
            && descriptor.block.is_none()
            && descriptor.chunk_count == 1
            && !matches!(self, PixelFormat::L8 | PixelFormat::La88)
    }
}

/// A format as requested by the API layer, which may name something this driver has never heard of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatRequest {
    Known(PixelFormat),
    Unrecognized(u32),
}

impl From<PixelFormat> for FormatRequest {
    fn from(format: PixelFormat) -> Self {
        FormatRequest::Known(format)
    }
}

/// Channel rearrangements the transfer engine can apply while it copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    Identity,
    SwapRedBlue,
    /// Writes 0xFF into the destination's unused byte.
    DropAlpha,
}

impl Conversion {
    /// Rewrites one texel in place.  Non-identity conversions only pair 32-bit formats.
    pub fn apply(self, texel: &mut [u8]) {
        match self {
            Conversion::Identity => {}
            Conversion::SwapRedBlue => {
                if texel.len() >= 3 {
                    texel.swap(0, 2);
                }
            }
            Conversion::DropAlpha => {
                if let Some(alpha) = texel.get_mut(3) {
                    *alpha = 0xFF;
                }
            }
        }
    }
}

/// The conversion the transfer engine would apply copying `source` texels into `destination`,
/// or `None` if the pairing needs a software conversion kernel.
///
/// Only same-depth pairings are supported.  Cross-depth conversions (say `Rgb565` into `A8`)
/// always go through software.
pub const fn hardware_conversion(source: PixelFormat, destination: PixelFormat) -> Option<Conversion> {
    use PixelFormat::*;
    match (source, destination) {
        (Rgba8888, Bgra8888) | (Bgra8888, Rgba8888) => Some(Conversion::SwapRedBlue),
        (Rgba8888, Rgbx8888) => Some(Conversion::DropAlpha),
        (Rgbx8888, Rgba8888) => Some(Conversion::Identity),
        _ => {
            if source as u32 == destination as u32 {
                Some(Conversion::Identity)
            } else {
                None
            }
        }
    }
}
