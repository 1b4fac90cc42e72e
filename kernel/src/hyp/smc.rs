// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::hyp::context::HostCpuContext;
use crate::hyp::ffa::kvm_host_ffa_handler;
use crate::hyp::psci::kvm_host_psci_handler;
use crate::hyp::Hyp;
use cpuarch::smccc::ARM_SMCCC_CALL_HINTS;

/// Relays an SMC from the host: PSCI first, then the FF-A proxy, then
/// straight to firmware. The host's PC is not advanced by the trap, so it
/// is stepped over the SMC here once the call is done.
pub fn handle_host_smc(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) {
    // Ids with bits above 31 belong to neither PSCI nor FF-A.
    let handled = match u32::try_from(ctxt.reg(0) & !ARM_SMCCC_CALL_HINTS) {
        Ok(func_id) => {
            kvm_host_psci_handler(hyp, ctxt, func_id) || kvm_host_ffa_handler(hyp, ctxt, func_id)
        }
        Err(_) => false,
    };
    if !handled {
        hyp.backend.forward_smc(ctxt);
    }

    ctxt.skip_instr();
}
