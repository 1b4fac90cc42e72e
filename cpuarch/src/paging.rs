// SPDX-License-Identifier: MIT OR Apache-2.0

//! x86 page-table bit definitions used by shadow paging.

pub const PT_PRESENT_MASK: u64 = 1 << 0;
pub const PT_WRITABLE_SHIFT: u32 = 1;
pub const PT_WRITABLE_MASK: u64 = 1 << PT_WRITABLE_SHIFT;
pub const PT_USER_MASK: u64 = 1 << 2;
pub const PT_PWT_MASK: u64 = 1 << 3;
pub const PT_PCD_MASK: u64 = 1 << 4;
pub const PT_ACCESSED_SHIFT: u32 = 5;
pub const PT_ACCESSED_MASK: u64 = 1 << PT_ACCESSED_SHIFT;
pub const PT_DIRTY_SHIFT: u32 = 6;
pub const PT_DIRTY_MASK: u64 = 1 << PT_DIRTY_SHIFT;
pub const PT_PAGE_SIZE_SHIFT: u32 = 7;
pub const PT_PAGE_SIZE_MASK: u64 = 1 << PT_PAGE_SIZE_SHIFT;
pub const PT_PAT_MASK: u64 = 1 << 7;
pub const PT_GLOBAL_MASK: u64 = 1 << 8;
pub const PT64_NX_SHIFT: u32 = 63;
pub const PT64_NX_MASK: u64 = 1 << PT64_NX_SHIFT;

/// Bits of a page-table entry available for software use.
pub const PT_SOFTWARE_MASK: u64 = 0x7 << 9;

pub const PT_PAGE_TABLE_LEVEL: u8 = 1;
pub const PT_DIRECTORY_LEVEL: u8 = 2;
pub const PT_PDPE_LEVEL: u8 = 3;
pub const PT64_ROOT_4LEVEL: u8 = 4;
pub const PT64_ROOT_5LEVEL: u8 = 5;

pub const PT64_LEVEL_BITS: u32 = 9;
pub const PT64_ENT_PER_PAGE: usize = 1 << PT64_LEVEL_BITS;

/// Highest physical address width supported by the architecture.
pub const MAX_PHYS_BITS: u32 = 52;
