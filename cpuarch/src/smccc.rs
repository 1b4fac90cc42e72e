// SPDX-License-Identifier: MIT OR Apache-2.0

//! Arm SMC Calling Convention function identifiers and return codes.

use bitfield_struct::bitfield;

pub const ARM_SMCCC_STD_CALL: u32 = 0;
pub const ARM_SMCCC_FAST_CALL: u32 = 1;
pub const ARM_SMCCC_TYPE_SHIFT: u32 = 31;

pub const ARM_SMCCC_SMC_32: u32 = 0;
pub const ARM_SMCCC_SMC_64: u32 = 1;
pub const ARM_SMCCC_CALL_CONV_SHIFT: u32 = 30;

pub const ARM_SMCCC_OWNER_MASK: u32 = 0x3F;
pub const ARM_SMCCC_OWNER_SHIFT: u32 = 24;

pub const ARM_SMCCC_FUNC_MASK: u32 = 0xFFFF;

pub const ARM_SMCCC_OWNER_ARCH: u32 = 0;
pub const ARM_SMCCC_OWNER_CPU: u32 = 1;
pub const ARM_SMCCC_OWNER_SIP: u32 = 2;
pub const ARM_SMCCC_OWNER_OEM: u32 = 3;
pub const ARM_SMCCC_OWNER_STANDARD: u32 = 4;
pub const ARM_SMCCC_OWNER_STANDARD_HYP: u32 = 5;
pub const ARM_SMCCC_OWNER_VENDOR_HYP: u32 = 6;
pub const ARM_SMCCC_OWNER_TRUSTED_APP: u32 = 48;
pub const ARM_SMCCC_OWNER_TRUSTED_OS: u32 = 50;

/// SMCCC v1.3 hint: the caller holds no live SVE state.
pub const ARM_SMCCC_1_3_SVE_HINT: u64 = 0x10000;
/// Bits a caller may set in a function id without changing its identity.
pub const ARM_SMCCC_CALL_HINTS: u64 = ARM_SMCCC_1_3_SVE_HINT;

pub const SMCCC_RET_SUCCESS: i64 = 0;
pub const SMCCC_RET_NOT_SUPPORTED: i64 = -1;
pub const SMCCC_RET_NOT_REQUIRED: i64 = -2;
pub const SMCCC_RET_INVALID_PARAMETER: i64 = -3;

/// Builds a function identifier from its components.
pub const fn arm_smccc_call_val(call_type: u32, conv: u32, owner: u32, func_num: u32) -> u32 {
    (call_type << ARM_SMCCC_TYPE_SHIFT)
        | (conv << ARM_SMCCC_CALL_CONV_SHIFT)
        | ((owner & ARM_SMCCC_OWNER_MASK) << ARM_SMCCC_OWNER_SHIFT)
        | (func_num & ARM_SMCCC_FUNC_MASK)
}

/// Function identifier of host hypercall number `id`.
pub const fn kvm_host_smccc_id(id: u32) -> u32 {
    arm_smccc_call_val(
        ARM_SMCCC_FAST_CALL,
        ARM_SMCCC_SMC_64,
        ARM_SMCCC_OWNER_VENDOR_HYP,
        id,
    )
}

/// Decoded view of the low 32 bits of an SMCCC function identifier.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SmcccFunctionId {
    pub func_num: u16,
    pub sve_hint: bool,
    #[bits(7)]
    _rsvd_17_23: u8,
    #[bits(6)]
    pub owner: u8,
    pub smc64: bool,
    pub fast_call: bool,
}

impl SmcccFunctionId {
    /// Decodes the function id held in register 0, ignoring the upper word.
    pub fn from_reg(reg: u64) -> Self {
        Self::from(reg as u32)
    }

    pub fn is_fast_call(&self) -> bool {
        self.fast_call()
    }

    pub fn owner_num(&self) -> u32 {
        u32::from(self.owner())
    }
}
