// SPDX-License-Identifier: MIT OR Apache-2.0

//! VMX extended page table entry bits.

pub const VMX_EPT_READABLE_MASK: u64 = 0x1;
pub const VMX_EPT_WRITABLE_MASK: u64 = 0x2;
pub const VMX_EPT_EXECUTABLE_MASK: u64 = 0x4;
pub const VMX_EPT_RWX_MASK: u64 =
    VMX_EPT_READABLE_MASK | VMX_EPT_WRITABLE_MASK | VMX_EPT_EXECUTABLE_MASK;
pub const VMX_EPT_MT_EPTE_SHIFT: u32 = 3;
pub const VMX_EPT_MT_MASK: u64 = 7 << VMX_EPT_MT_EPTE_SHIFT;
pub const VMX_EPT_IPAT_BIT: u64 = 1 << 6;
pub const VMX_EPT_ACCESS_BIT: u64 = 1 << 8;
pub const VMX_EPT_DIRTY_BIT: u64 = 1 << 9;
pub const VMX_EPT_SUPPRESS_VE_BIT: u64 = 1 << 63;

/// Write+execute without read: a misconfiguration for every EPT walker, used
/// as the MMIO marker value.
pub const VMX_EPT_MISCONFIG_WX_VALUE: u64 = VMX_EPT_WRITABLE_MASK | VMX_EPT_EXECUTABLE_MASK;
