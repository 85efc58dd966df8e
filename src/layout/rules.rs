// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-layout strategy tables.
//!
//! Which restriction applies to an image depends on its layout.  Rather than switching on the
//! layout at every use, each layout has one [`LayoutRules`] value holding its alignment,
//! rounding and minimum-footprint rules, and callers ask the table.

use super::{Extent, MemoryLayout, Rect};
use crate::bittricks::{align_up, next_pow2};

/// Side of a square tile in the tiled layout.
pub const TILE_SIZE: u32 = 32;

/// Widths at or below this use the small stride alignment in the strided layout.
pub const STRIDED_WIDTH_THRESHOLD: u32 = 16;
/// Stride granularity in pixels for narrow strided images.
pub const STRIDED_ALIGNMENT_SMALL: u32 = 4;
/// Stride granularity in pixels for wide strided images.
pub const STRIDED_ALIGNMENT_LARGE: u32 = 32;

/// Byte alignment of each cube face in a mip-mapped cube map above the no-align threshold.
pub const CUBE_FACE_ALIGNMENT: u64 = 1024;

/// How a layout pads an image's dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rounding {
    /// Width padded to the stride granularity, height untouched.
    StrideGranularity,
    /// Both dimensions padded to [`TILE_SIZE`].
    Tile,
    /// Both dimensions padded to the next power of two.
    PowerOfTwo,
}

/// Why a transfer footprint is unacceptable to a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FootprintViolation {
    TooSmall { minimum: Extent },
    Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutRules {
    pub layout: MemoryLayout,
    pub rounding: Rounding,
    /// Smallest clamped footprint the transfer engine can write.
    pub min_footprint: Extent,
    /// When set, the minimum footprint only applies to footprints with more pixels than this.
    pub min_footprint_applies_above: Option<u64>,
    /// Whether the transfer engine restricts the aspect ratio of a footprint.
    pub restricts_footprint_shape: bool,
    /// Top-level size (largest dimension) above which mip-mapped cube faces are aligned.
    pub cube_no_align_threshold: u32,
}

static STRIDED: LayoutRules = LayoutRules {
    layout: MemoryLayout::Strided,
    rounding: Rounding::StrideGranularity,
    min_footprint: Extent::new(3, 3),
    min_footprint_applies_above: Some(16),
    restricts_footprint_shape: false,
    cube_no_align_threshold: 16,
};

static TILED: LayoutRules = LayoutRules {
    layout: MemoryLayout::Tiled,
    rounding: Rounding::Tile,
    min_footprint: Extent::new(3, 3),
    min_footprint_applies_above: None,
    restricts_footprint_shape: false,
    cube_no_align_threshold: TILE_SIZE,
};

static TWIDDLED: LayoutRules = LayoutRules {
    layout: MemoryLayout::Twiddled,
    rounding: Rounding::PowerOfTwo,
    min_footprint: Extent::new(7, 7),
    min_footprint_applies_above: None,
    restricts_footprint_shape: true,
    cube_no_align_threshold: 8,
};

static HYBRID_TWIDDLED: LayoutRules = LayoutRules {
    layout: MemoryLayout::HybridTwiddled,
    rounding: Rounding::PowerOfTwo,
    min_footprint: Extent::new(7, 7),
    min_footprint_applies_above: None,
    restricts_footprint_shape: true,
    cube_no_align_threshold: 16,
};

impl MemoryLayout {
    pub fn rules(self) -> &'static LayoutRules {
        match self {
            MemoryLayout::Strided => &STRIDED,
            MemoryLayout::Tiled => &TILED,
            MemoryLayout::Twiddled => &TWIDDLED,
            MemoryLayout::HybridTwiddled => &HYBRID_TWIDDLED,
        }
    }
}

impl LayoutRules {
    /// Row alignment in pixels for an image `width` pixels wide.
    pub fn stride_alignment(&self, width: u32) -> u32 {
        match self.rounding {
            Rounding::StrideGranularity => {
                if width <= STRIDED_WIDTH_THRESHOLD {
                    STRIDED_ALIGNMENT_SMALL
                } else {
                    STRIDED_ALIGNMENT_LARGE
                }
            }
            Rounding::Tile => TILE_SIZE,
            Rounding::PowerOfTwo => 1,
        }
    }

    /// Row stride in bytes of an image `width` pixels wide.  Twiddled images get no alignment.
    pub fn stride_bytes(&self, width: u32, bytes_per_texel: u32) -> u32 {
        align_up(width, self.stride_alignment(width)) * bytes_per_texel
    }

    /// Dimensions as stored by this layout.
    pub fn round_extent(&self, extent: Extent) -> Extent {
        match self.rounding {
            Rounding::StrideGranularity => Extent::new(
                align_up(extent.width, self.stride_alignment(extent.width)),
                extent.height,
            ),
            Rounding::Tile => Extent::new(
                align_up(extent.width, TILE_SIZE),
                align_up(extent.height, TILE_SIZE),
            ),
            Rounding::PowerOfTwo => Extent::new(next_pow2(extent.width), next_pow2(extent.height)),
        }
    }

    /**
    Checks a transfer footprint against this layout's restrictions.

    `footprint` is the requested destination rectangle, `level` the extent of the image being
    written.  The minimum applies to the footprint clamped to the image, which is what the
    engine actually walks.
    */
    pub fn check_footprint(&self, footprint: Rect, level: Extent) -> Result<(), FootprintViolation> {
        let clamped = footprint.clamp_to(level);
        let minimum_applies = match self.min_footprint_applies_above {
            Some(threshold) => footprint.area() > threshold,
            None => true,
        };
        if minimum_applies
            && (clamped.width < self.min_footprint.width || clamped.height < self.min_footprint.height)
        {
            return Err(FootprintViolation::TooSmall {
                minimum: self.min_footprint,
            });
        }
        if self.restricts_footprint_shape && !Self::twiddled_shape_ok(footprint, level) {
            return Err(FootprintViolation::Shape);
        }
        Ok(())
    }

    /// Twiddled writes must cover a square or double-width power-of-two block, unless the
    /// footprint is exactly the whole image.
    fn twiddled_shape_ok(footprint: Rect, level: Extent) -> bool {
        if footprint == level.full_rect() {
            return true;
        }
        let width = next_pow2(footprint.width);
        let height = next_pow2(footprint.height);
        width == height || width == 2 * height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_alignment_depends_on_width() {
        let rules = MemoryLayout::Strided.rules();
        assert_eq!(rules.stride_alignment(10), STRIDED_ALIGNMENT_SMALL);
        assert_eq!(rules.stride_alignment(17), STRIDED_ALIGNMENT_LARGE);
        assert_eq!(rules.stride_bytes(10, 2), 12 * 2);
        assert_eq!(rules.stride_bytes(100, 4), 128 * 4);
    }

    #[test]
    fn tiled_and_twiddled_strides() {
        assert_eq!(MemoryLayout::Tiled.rules().stride_bytes(33, 4), 64 * 4);
        assert_eq!(MemoryLayout::Twiddled.rules().stride_bytes(33, 4), 33 * 4);
        assert_eq!(
            MemoryLayout::Twiddled.rules().round_extent(Extent::new(33, 5)),
            Extent::new(64, 8)
        );
    }

    #[test]
    fn strided_minimum_only_above_sixteen_pixels() {
        let rules = MemoryLayout::Strided.rules();
        let level = Extent::new(64, 64);
        //a 2x8 footprint is 16 pixels, so the erratum does not apply
        assert_eq!(rules.check_footprint(Rect::new(0, 0, 2, 8), level), Ok(()));
        assert!(matches!(
            rules.check_footprint(Rect::new(0, 0, 2, 9), level),
            Err(FootprintViolation::TooSmall { .. })
        ));
        //clamping can shrink a large request below the minimum
        assert!(rules.check_footprint(Rect::new(62, 0, 10, 10), level).is_err());
    }

    #[test]
    fn tiled_minimum_always_applies() {
        let rules = MemoryLayout::Tiled.rules();
        let level = Extent::new(64, 64);
        assert!(rules.check_footprint(Rect::new(0, 0, 2, 2), level).is_err());
        assert_eq!(rules.check_footprint(Rect::new(0, 0, 3, 3), level), Ok(()));
    }

    #[test]
    fn twiddled_minimum_and_shape() {
        let rules = MemoryLayout::Twiddled.rules();
        let level = Extent::new(64, 64);
        assert!(matches!(
            rules.check_footprint(Rect::new(0, 0, 4, 4), Extent::new(4, 4)),
            Err(FootprintViolation::TooSmall { .. })
        ));
        assert_eq!(rules.check_footprint(Rect::new(0, 0, 8, 8), level), Ok(()));
        assert_eq!(rules.check_footprint(Rect::new(8, 8, 16, 8), level), Ok(()));
        assert_eq!(
            rules.check_footprint(Rect::new(0, 0, 8, 32), level),
            Err(FootprintViolation::Shape)
        );
        //the whole image is always acceptable
        let tall = Extent::new(8, 32);
        assert_eq!(rules.check_footprint(tall.full_rect(), tall), Ok(()));
    }
}
