// SPDX-License-Identifier: MIT OR Apache-2.0

//! Power State Coordination Interface function ids and return codes.

pub const PSCI_0_2_FN_BASE: u32 = 0x8400_0000;
pub const PSCI_0_2_FN64_BASE: u32 = 0xC400_0000;
pub const PSCI_0_2_FN_MAX: u32 = 0x1F;

pub const fn psci_0_2_fn(n: u32) -> u32 {
    PSCI_0_2_FN_BASE + n
}

pub const fn psci_0_2_fn64(n: u32) -> u32 {
    PSCI_0_2_FN64_BASE + n
}

pub const PSCI_0_2_FN_PSCI_VERSION: u32 = psci_0_2_fn(0);
pub const PSCI_0_2_FN_CPU_SUSPEND: u32 = psci_0_2_fn(1);
pub const PSCI_0_2_FN_CPU_OFF: u32 = psci_0_2_fn(2);
pub const PSCI_0_2_FN_CPU_ON: u32 = psci_0_2_fn(3);
pub const PSCI_0_2_FN_AFFINITY_INFO: u32 = psci_0_2_fn(4);
pub const PSCI_0_2_FN_MIGRATE: u32 = psci_0_2_fn(5);
pub const PSCI_0_2_FN_MIGRATE_INFO_TYPE: u32 = psci_0_2_fn(6);
pub const PSCI_0_2_FN_MIGRATE_INFO_UP_CPU: u32 = psci_0_2_fn(7);
pub const PSCI_0_2_FN_SYSTEM_OFF: u32 = psci_0_2_fn(8);
pub const PSCI_0_2_FN_SYSTEM_RESET: u32 = psci_0_2_fn(9);

pub const PSCI_0_2_FN64_CPU_SUSPEND: u32 = psci_0_2_fn64(1);
pub const PSCI_0_2_FN64_CPU_ON: u32 = psci_0_2_fn64(3);
pub const PSCI_0_2_FN64_AFFINITY_INFO: u32 = psci_0_2_fn64(4);
pub const PSCI_0_2_FN64_MIGRATE: u32 = psci_0_2_fn64(5);
pub const PSCI_0_2_FN64_MIGRATE_INFO_UP_CPU: u32 = psci_0_2_fn64(7);

pub const PSCI_1_0_FN_PSCI_FEATURES: u32 = psci_0_2_fn(10);
pub const PSCI_1_0_FN_SYSTEM_SUSPEND: u32 = psci_0_2_fn(14);
pub const PSCI_1_0_FN_SET_SUSPEND_MODE: u32 = psci_0_2_fn(15);
pub const PSCI_1_1_FN_SYSTEM_RESET2: u32 = psci_0_2_fn(18);

pub const PSCI_1_0_FN64_SYSTEM_SUSPEND: u32 = psci_0_2_fn64(14);
pub const PSCI_1_1_FN64_SYSTEM_RESET2: u32 = psci_0_2_fn64(18);

pub const PSCI_RET_SUCCESS: i32 = 0;
pub const PSCI_RET_NOT_SUPPORTED: i32 = -1;
pub const PSCI_RET_INVALID_PARAMS: i32 = -2;
pub const PSCI_RET_DENIED: i32 = -3;
pub const PSCI_RET_ALREADY_ON: i32 = -4;
pub const PSCI_RET_ON_PENDING: i32 = -5;
pub const PSCI_RET_INTERNAL_FAILURE: i32 = -6;
pub const PSCI_RET_NOT_PRESENT: i32 = -7;
pub const PSCI_RET_DISABLED: i32 = -8;
pub const PSCI_RET_INVALID_ADDRESS: i32 = -9;

pub const PSCI_VERSION_MAJOR_SHIFT: u32 = 16;
pub const PSCI_VERSION_MINOR_MASK: u32 = (1 << PSCI_VERSION_MAJOR_SHIFT) - 1;

pub const fn psci_version(major: u32, minor: u32) -> u32 {
    (major << PSCI_VERSION_MAJOR_SHIFT) | (minor & PSCI_VERSION_MINOR_MASK)
}

pub const fn psci_version_major(ver: u32) -> u32 {
    ver >> PSCI_VERSION_MAJOR_SHIFT
}

pub const fn psci_version_minor(ver: u32) -> u32 {
    ver & PSCI_VERSION_MINOR_MASK
}

/// Bits of an MPIDR_EL1 value that identify a CPU.
pub const MPIDR_HWID_BITMASK: u64 = 0xFF_00FF_FFFF;
