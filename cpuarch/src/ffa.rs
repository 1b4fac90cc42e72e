// SPDX-License-Identifier: MIT OR Apache-2.0

//! Arm Firmware Framework for A-profile (FF-A) ABI identifiers.

use crate::smccc::{
    arm_smccc_call_val, ARM_SMCCC_FAST_CALL, ARM_SMCCC_OWNER_STANDARD, ARM_SMCCC_SMC_32,
    ARM_SMCCC_SMC_64,
};

pub const FFA_MIN_FUNC_NUM: u32 = 0x60;
pub const FFA_MAX_FUNC_NUM: u32 = 0x7F;

pub const fn ffa_smc32(func: u32) -> u32 {
    arm_smccc_call_val(
        ARM_SMCCC_FAST_CALL,
        ARM_SMCCC_SMC_32,
        ARM_SMCCC_OWNER_STANDARD,
        func,
    )
}

pub const fn ffa_smc64(func: u32) -> u32 {
    arm_smccc_call_val(
        ARM_SMCCC_FAST_CALL,
        ARM_SMCCC_SMC_64,
        ARM_SMCCC_OWNER_STANDARD,
        func,
    )
}

pub const FFA_ERROR: u32 = ffa_smc32(0x60);
pub const FFA_SUCCESS: u32 = ffa_smc32(0x61);
pub const FFA_FN64_SUCCESS: u32 = ffa_smc64(0x61);
pub const FFA_INTERRUPT: u32 = ffa_smc32(0x62);
pub const FFA_VERSION: u32 = ffa_smc32(0x63);
pub const FFA_FEATURES: u32 = ffa_smc32(0x64);
pub const FFA_RX_RELEASE: u32 = ffa_smc32(0x65);
pub const FFA_RXTX_MAP: u32 = ffa_smc32(0x66);
pub const FFA_FN64_RXTX_MAP: u32 = ffa_smc64(0x66);
pub const FFA_RXTX_UNMAP: u32 = ffa_smc32(0x67);
pub const FFA_PARTITION_INFO_GET: u32 = ffa_smc32(0x68);
pub const FFA_ID_GET: u32 = ffa_smc32(0x69);
pub const FFA_MSG_POLL: u32 = ffa_smc32(0x6A);
pub const FFA_MSG_WAIT: u32 = ffa_smc32(0x6B);
pub const FFA_YIELD: u32 = ffa_smc32(0x6C);
pub const FFA_RUN: u32 = ffa_smc32(0x6D);
pub const FFA_MSG_SEND: u32 = ffa_smc32(0x6E);
pub const FFA_MSG_SEND_DIRECT_REQ: u32 = ffa_smc32(0x6F);
pub const FFA_FN64_MSG_SEND_DIRECT_REQ: u32 = ffa_smc64(0x6F);
pub const FFA_MSG_SEND_DIRECT_RESP: u32 = ffa_smc32(0x70);
pub const FFA_FN64_MSG_SEND_DIRECT_RESP: u32 = ffa_smc64(0x70);
pub const FFA_MEM_DONATE: u32 = ffa_smc32(0x71);
pub const FFA_FN64_MEM_DONATE: u32 = ffa_smc64(0x71);
pub const FFA_MEM_LEND: u32 = ffa_smc32(0x72);
pub const FFA_FN64_MEM_LEND: u32 = ffa_smc64(0x72);
pub const FFA_MEM_SHARE: u32 = ffa_smc32(0x73);
pub const FFA_FN64_MEM_SHARE: u32 = ffa_smc64(0x73);
pub const FFA_MEM_RETRIEVE_REQ: u32 = ffa_smc32(0x74);
pub const FFA_FN64_MEM_RETRIEVE_REQ: u32 = ffa_smc64(0x74);
pub const FFA_MEM_RETRIEVE_RESP: u32 = ffa_smc32(0x75);
pub const FFA_MEM_RELINQUISH: u32 = ffa_smc32(0x76);
pub const FFA_MEM_RECLAIM: u32 = ffa_smc32(0x77);
pub const FFA_MEM_OP_PAUSE: u32 = ffa_smc32(0x78);
pub const FFA_MEM_OP_RESUME: u32 = ffa_smc32(0x79);
pub const FFA_MEM_FRAG_RX: u32 = ffa_smc32(0x7A);
pub const FFA_MEM_FRAG_TX: u32 = ffa_smc32(0x7B);

pub const FFA_RET_SUCCESS: i32 = 0;
pub const FFA_RET_NOT_SUPPORTED: i32 = -1;
pub const FFA_RET_INVALID_PARAMETERS: i32 = -2;
pub const FFA_RET_NO_MEMORY: i32 = -3;
pub const FFA_RET_BUSY: i32 = -4;
pub const FFA_RET_INTERRUPTED: i32 = -5;
pub const FFA_RET_DENIED: i32 = -6;
pub const FFA_RET_RETRY: i32 = -7;
pub const FFA_RET_ABORTED: i32 = -8;
