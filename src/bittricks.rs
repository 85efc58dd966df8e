// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
bit and alignment arithmetic.

Everything here works on unsigned integers and is `const` so the layout tables can use it.
*/

/// Rounds `value` up to a multiple of `alignment`.  `alignment` must be non-zero.
pub const fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

pub const fn align_up_u64(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Smallest power of two that is `>= value`.  0 rounds to 1.
pub const fn next_pow2(value: u32) -> u32 {
    if value <= 1 { 1 } else { value.next_power_of_two() }
}

/// Halves a mip dimension, clamping at 1 so chains end on a 1x1 level.
pub const fn halve(dimension: u32) -> u32 {
    let half = dimension >> 1;
    if half == 0 { 1 } else { half }
}

/// Dimension of `level` in a chain whose top level is `top`.  An empty chain stays empty.
pub const fn level_dimension(top: u32, level: u32) -> u32 {
    if top == 0 {
        return 0;
    }
    if level >= u32::BITS {
        return 1;
    }
    let shifted = top >> level;
    if shifted == 0 { 1 } else { shifted }
}
