// SPDX-License-Identifier: MIT OR Apache-2.0

//! FF-A proxy filter. Memory sharing with the secure world is mediated by
//! the hypervisor; calls it cannot mediate are refused and the rest pass
//! through to firmware.

use crate::hyp::backend::SmcccRes;
use crate::hyp::context::{declare_reg, HostCpuContext, IntoReg};
use crate::hyp::Hyp;
use cpuarch::ffa::*;
use cpuarch::smccc::{SmcccFunctionId, ARM_SMCCC_OWNER_STANDARD};

fn is_ffa_call(func_id: u32) -> bool {
    let id = SmcccFunctionId::from(func_id);
    let num = u32::from(id.func_num());
    id.is_fast_call()
        && id.owner_num() == ARM_SMCCC_OWNER_STANDARD
        && (FFA_MIN_FUNC_NUM..=FFA_MAX_FUNC_NUM).contains(&num)
}

/// Calls the proxy refuses outright.
fn ffa_call_supported(func_id: u32) -> bool {
    !matches!(
        func_id,
        // Unsupported memory management calls
        FFA_FN64_MEM_RETRIEVE_REQ
            | FFA_MEM_RETRIEVE_RESP
            | FFA_MEM_RELINQUISH
            | FFA_MEM_OP_PAUSE
            | FFA_MEM_OP_RESUME
            | FFA_MEM_FRAG_RX
            | FFA_FN64_MEM_DONATE
            // Indirect message passing via RX/TX buffers
            | FFA_MSG_SEND
            | FFA_MSG_POLL
            | FFA_MSG_WAIT
            // 32-bit variants of 64-bit calls
            | FFA_MSG_SEND_DIRECT_REQ
            | FFA_MSG_SEND_DIRECT_RESP
            | FFA_RXTX_MAP
            | FFA_MEM_DONATE
            | FFA_MEM_RETRIEVE_REQ
    )
}

fn ffa_error(code: i32) -> SmcccRes {
    SmcccRes {
        a0: FFA_ERROR.into(),
        a2: code.into_reg(),
        ..Default::default()
    }
}

fn ffa_success(prop: u64) -> SmcccRes {
    SmcccRes {
        a0: FFA_SUCCESS.into(),
        a2: prop,
        ..Default::default()
    }
}

/// FFA_FEATURES for a call the proxy handles itself. `None` lets firmware
/// answer.
fn do_ffa_features(ctxt: &HostCpuContext) -> Option<SmcccRes> {
    declare_reg!(u32, id, ctxt, 1);

    if !ffa_call_supported(id) {
        return Some(ffa_error(FFA_RET_NOT_SUPPORTED));
    }

    match id {
        // No support for dynamic buffers.
        FFA_MEM_SHARE | FFA_FN64_MEM_SHARE | FFA_MEM_LEND | FFA_FN64_MEM_LEND => {
            Some(ffa_success(0))
        }
        _ => None,
    }
}

/// Handles `func_id` if it is an FF-A call the proxy intercepts. Returns
/// `false` for calls that go to firmware unchanged.
pub fn kvm_host_ffa_handler(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext, func_id: u32) -> bool {
    // Non-FF-A calls are forwarded: firmware is trusted anyway and devices
    // rely on vendor calls.
    if !is_ffa_call(func_id) {
        return false;
    }

    let res = match func_id {
        FFA_FEATURES => match do_ffa_features(ctxt) {
            Some(res) => res,
            None => return false,
        },
        FFA_FN64_RXTX_MAP | FFA_RXTX_UNMAP | FFA_MEM_RECLAIM | FFA_MEM_FRAG_TX => {
            hyp.backend.ffa_mem_op(func_id, ctxt)
        }
        FFA_MEM_SHARE | FFA_FN64_MEM_SHARE => hyp.backend.ffa_mem_op(FFA_FN64_MEM_SHARE, ctxt),
        FFA_MEM_LEND | FFA_FN64_MEM_LEND => hyp.backend.ffa_mem_op(FFA_FN64_MEM_LEND, ctxt),
        _ if ffa_call_supported(func_id) => return false,
        _ => {
            log::debug!("Refusing FF-A call {:#x}", func_id);
            ffa_error(FFA_RET_NOT_SUPPORTED)
        }
    };

    res.write_to(ctxt);
    true
}
