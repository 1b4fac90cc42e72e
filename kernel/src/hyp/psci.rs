// SPDX-License-Identifier: MIT OR Apache-2.0

//! PSCI relay. Power management calls from the host are forwarded to
//! firmware, except that CPUs are always started and resumed through the
//! hypervisor's own entry points.

use crate::address::PhysAddr;
use crate::hyp::context::{declare_reg, HostCpuContext, IntoReg};
use crate::hyp::{Hyp, HypPerCpu};
use crate::utils::immut_after_init::immut_after_init_set_multithreaded;
use cpuarch::psci::*;

fn is_psci_0_2_call(func_id: u32) -> bool {
    (psci_0_2_fn(0)..=psci_0_2_fn(PSCI_0_2_FN_MAX)).contains(&func_id)
        || (psci_0_2_fn64(0)..=psci_0_2_fn64(PSCI_0_2_FN_MAX)).contains(&func_id)
}

fn ret(val: i32) -> u64 {
    val.into_reg()
}

fn psci_forward(hyp: &Hyp<'_>, func_id: u32, ctxt: &HostCpuContext) -> u64 {
    hyp.backend
        .psci_call(func_id, ctxt.reg(1), ctxt.reg(2), ctxt.reg(3))
}

fn this_cpu<'h>(hyp: &'h Hyp<'_>, ctxt: &HostCpuContext) -> Option<(&'h HypPerCpu, PhysAddr)> {
    let percpu = hyp.percpu(ctxt.cpu)?;
    let init_params = hyp.config.cpus.get(ctxt.cpu)?.init_params;
    Some((percpu, init_params))
}

fn psci_cpu_suspend(hyp: &Hyp<'_>, func_id: u32, ctxt: &HostCpuContext) -> u64 {
    declare_reg!(u64, power_state, ctxt, 1);
    declare_reg!(u64, pc, ctxt, 2);
    declare_reg!(u64, r0, ctxt, 3);

    let Some((percpu, init_params)) = this_cpu(hyp, ctxt) else {
        return ret(PSCI_RET_INTERNAL_FAILURE);
    };

    // Several CPUs can be suspending at once but each only touches its own
    // slot, so no locking.
    percpu.suspend_args.set(pc, r0);

    hyp.backend.psci_call(
        func_id,
        power_state,
        hyp.config.psci.cpu_resume.as_u64(),
        init_params.as_u64(),
    )
}

fn psci_system_suspend(hyp: &Hyp<'_>, func_id: u32, ctxt: &HostCpuContext) -> u64 {
    declare_reg!(u64, pc, ctxt, 1);
    declare_reg!(u64, r0, ctxt, 2);

    let Some((percpu, init_params)) = this_cpu(hyp, ctxt) else {
        return ret(PSCI_RET_INTERNAL_FAILURE);
    };

    percpu.suspend_args.set(pc, r0);

    hyp.backend.psci_call(
        func_id,
        hyp.config.psci.cpu_resume.as_u64(),
        init_params.as_u64(),
        0,
    )
}

fn psci_cpu_on(hyp: &Hyp<'_>, func_id: u32, ctxt: &HostCpuContext) -> u64 {
    declare_reg!(u64, mpidr, ctxt, 1);
    declare_reg!(u64, pc, ctxt, 2);
    declare_reg!(u64, r0, ctxt, 3);

    // Only CPUs known at init can be brought up.
    if mpidr & !MPIDR_HWID_BITMASK != 0 {
        return ret(PSCI_RET_INVALID_PARAMS);
    }
    let Some(cpu) = hyp.cpu_by_mpidr(mpidr) else {
        return ret(PSCI_RET_INVALID_PARAMS);
    };
    let (Some(percpu), Some(cpu_cfg)) = (hyp.percpu(cpu), hyp.config.cpus.get(cpu)) else {
        return ret(PSCI_RET_INVALID_PARAMS);
    };

    let boot_args = &percpu.cpu_on_args;
    if !boot_args.try_acquire() {
        return ret(PSCI_RET_ALREADY_ON);
    }
    boot_args.set(pc, r0);

    let res = hyp.backend.psci_call(
        func_id,
        mpidr,
        hyp.config.psci.cpu_entry.as_u64(),
        cpu_cfg.init_params.as_u64(),
    );

    // On success the target CPU releases the slot from its entry path.
    if res != ret(PSCI_RET_SUCCESS) {
        boot_args.release();
    }
    res
}

fn psci_0_2_handler(hyp: &Hyp<'_>, func_id: u32, ctxt: &HostCpuContext) -> u64 {
    match func_id {
        PSCI_0_2_FN_PSCI_VERSION
        | PSCI_0_2_FN_CPU_OFF
        | PSCI_0_2_FN64_AFFINITY_INFO
        | PSCI_0_2_FN64_MIGRATE
        | PSCI_0_2_FN_MIGRATE_INFO_TYPE
        | PSCI_0_2_FN64_MIGRATE_INFO_UP_CPU
        | PSCI_0_2_FN_SYSTEM_OFF
        | PSCI_0_2_FN_SYSTEM_RESET => psci_forward(hyp, func_id, ctxt),
        PSCI_0_2_FN64_CPU_SUSPEND => psci_cpu_suspend(hyp, func_id, ctxt),
        PSCI_0_2_FN64_CPU_ON => psci_cpu_on(hyp, func_id, ctxt),
        _ => ret(PSCI_RET_NOT_SUPPORTED),
    }
}

fn psci_1_0_handler(hyp: &Hyp<'_>, func_id: u32, ctxt: &HostCpuContext) -> u64 {
    match func_id {
        PSCI_1_0_FN_PSCI_FEATURES | PSCI_1_0_FN_SET_SUSPEND_MODE | PSCI_1_1_FN64_SYSTEM_RESET2 => {
            psci_forward(hyp, func_id, ctxt)
        }
        PSCI_1_0_FN64_SYSTEM_SUSPEND => psci_system_suspend(hyp, func_id, ctxt),
        _ => psci_0_2_handler(hyp, func_id, ctxt),
    }
}

/// Handles `func_id` if it is a PSCI call of the firmware's version.
/// Returns `false` if the call is not PSCI and must go elsewhere.
pub fn kvm_host_psci_handler(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext, func_id: u32) -> bool {
    let version = hyp.config.psci.version;

    // v0.1 function ids are assigned by the device tree, which the
    // hypervisor never sees.
    if version < psci_version(0, 2) || !is_psci_0_2_call(func_id) {
        return false;
    }

    let res = if version == psci_version(0, 2) {
        psci_0_2_handler(hyp, func_id, ctxt)
    } else {
        psci_1_0_handler(hyp, func_id, ctxt)
    };

    ctxt.set_reg(0, res);
    ctxt.set_reg(1, 0);
    ctxt.set_reg(2, 0);
    ctxt.set_reg(3, 0);
    true
}

/// Entry of a CPU started by CPU_ON or resumed from suspend: hand control
/// back to the host at the address it asked for.
pub fn kvm_host_psci_cpu_entry(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext, is_cpu_on: bool) {
    let Some(percpu) = hyp.percpu(ctxt.cpu) else {
        return;
    };
    let boot_args = if is_cpu_on {
        &percpu.cpu_on_args
    } else {
        &percpu.suspend_args
    };

    ctxt.set_reg(0, boot_args.r0());
    ctxt.elr = boot_args.pc();

    if is_cpu_on {
        immut_after_init_set_multithreaded();
        boot_args.release();
    }
}
