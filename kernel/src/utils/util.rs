// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::types::{PAGE_SHIFT, PAGE_SIZE};

/// Rounds `addr` up to a multiple of `align`, a power of two. `None` if the
/// result does not fit in a `u64`.
pub fn checked_align_up(addr: u64, align: u64) -> Option<u64> {
    let mask = align - 1;
    addr.checked_add(mask).map(|a| a & !mask)
}

pub fn page_offset(x: u64) -> u64 {
    x & (PAGE_SIZE - 1)
}

/// Smallest order such that `PAGE_SIZE << order` covers `size` bytes.
pub fn get_order(size: u64) -> u32 {
    if size <= PAGE_SIZE {
        return 0;
    }
    let pages = (size - 1) >> PAGE_SHIFT;
    u64::BITS - pages.leading_zeros()
}

/// Mask with bits `s` through `e` (inclusive) set.
pub const fn rsvd_bits(s: u32, e: u32) -> u64 {
    if e < s {
        return 0;
    }
    (u64::MAX >> (63 - e)) & !((1u64 << s) - 1)
}

/// Mask with bits `l` through `h` (inclusive) set.
pub const fn genmask(h: u32, l: u32) -> u64 {
    rsvd_bits(l, h)
}

/// Replicates `b` into every byte of a 64-bit word.
pub const fn repeat_byte(b: u8) -> u64 {
    (b as u64) * 0x0101_0101_0101_0101
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_utils() {
        assert_eq!(checked_align_up(7, 4), Some(8));
        assert_eq!(checked_align_up(16, 8), Some(16));
        assert_eq!(checked_align_up(0x1001, PAGE_SIZE), Some(0x2000));
        let top = u64::MAX - PAGE_SIZE + 1;
        assert_eq!(checked_align_up(top, PAGE_SIZE), Some(top));
        assert_eq!(checked_align_up(u64::MAX, PAGE_SIZE), None);
        assert_eq!(page_offset(0x1234), 0x234);
    }

    #[test]
    fn test_get_order() {
        assert_eq!(get_order(1), 0);
        assert_eq!(get_order(PAGE_SIZE), 0);
        assert_eq!(get_order(PAGE_SIZE + 1), 1);
        assert_eq!(get_order(2 * PAGE_SIZE), 1);
        assert_eq!(get_order(3 * PAGE_SIZE), 2);
        assert_eq!(get_order(16 * PAGE_SIZE), 4);
    }

    #[test]
    fn test_bit_masks() {
        assert_eq!(rsvd_bits(7, 7), 1 << 7);
        assert_eq!(rsvd_bits(13, 20), 0x1F_E000);
        assert_eq!(rsvd_bits(52, 63), 0xFFF0_0000_0000_0000);
        assert_eq!(rsvd_bits(0, 63), u64::MAX);
        assert_eq!(rsvd_bits(10, 3), 0);
        assert_eq!(genmask(10, 3), 0x7F8);
        assert_eq!(repeat_byte(1 << 2), 0x0404_0404_0404_0404);
    }
}
