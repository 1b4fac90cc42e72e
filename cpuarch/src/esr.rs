// SPDX-License-Identifier: MIT OR Apache-2.0

//! AArch64 exception syndrome (ESR_ELx) layout.

use bitfield_struct::bitfield;

pub const ESR_ELX_EC_SHIFT: u32 = 26;
pub const ESR_ELX_EC_WIDTH: u32 = 6;
pub const ESR_ELX_EC_MASK: u64 = 0x3F << ESR_ELX_EC_SHIFT;
pub const ESR_ELX_ISS_MASK: u64 = 0x1FF_FFFF;

// Exception classes
pub const ESR_ELX_EC_UNKNOWN: u8 = 0x00;
pub const ESR_ELX_EC_WFX: u8 = 0x01;
pub const ESR_ELX_EC_FP_ASIMD: u8 = 0x07;
pub const ESR_ELX_EC_HVC32: u8 = 0x12;
pub const ESR_ELX_EC_SMC32: u8 = 0x13;
pub const ESR_ELX_EC_HVC64: u8 = 0x16;
pub const ESR_ELX_EC_SMC64: u8 = 0x17;
pub const ESR_ELX_EC_SYS64: u8 = 0x18;
pub const ESR_ELX_EC_SVE: u8 = 0x19;
pub const ESR_ELX_EC_IABT_LOW: u8 = 0x20;
pub const ESR_ELX_EC_IABT_CUR: u8 = 0x21;
pub const ESR_ELX_EC_DABT_LOW: u8 = 0x24;
pub const ESR_ELX_EC_DABT_CUR: u8 = 0x25;

/// Size of every A64 instruction, used to step over trapping SMCs.
pub const AARCH64_INSN_SIZE: u64 = 4;

/// Exception Syndrome Register as reported on entry to EL2.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Esr {
    #[bits(25)]
    pub iss: u32,
    /// Instruction length: set for 32-bit instructions.
    pub il: bool,
    #[bits(6)]
    pub ec: u8,
    #[bits(5)]
    pub iss2: u8,
    #[bits(27)]
    _rsvd_37_63: u32,
}

impl Esr {
    /// Syndrome for a trap of the given exception class with an empty ISS.
    pub fn from_class(ec: u8) -> Self {
        Self::new().with_il(true).with_ec(ec)
    }
}
