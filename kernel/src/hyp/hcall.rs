// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::hyp::context::HostCpuContext;
use crate::hyp::errors::{HcallError, SmcccRet};
use crate::hyp::handlers::*;
use crate::hyp::Hyp;
use cpuarch::smccc::{kvm_host_smccc_id, ARM_SMCCC_CALL_HINTS};

/// Host hypercall numbers, offset from `KVM_HOST_SMCCC_ID(0)`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvmHostFunc {
    /// Handled by the init vectors, never by the table.
    HypInit = 0,
    GetMdcrEl2,
    PkvmInit,
    PkvmCreatePrivateMapping,
    PkvmCpuSetVector,
    EnableSsbs,
    VgicV3InitLrs,
    VgicV3GetGicConfig,
    /// First call still available once protected mode is initialized.
    PkvmProtFinalize,
    PkvmHostShareHyp,
    PkvmHostUnshareHyp,
    AdjustPc,
    VcpuRun,
    FlushVmContext,
    TlbFlushVmidIpa,
    TlbFlushVmidIpaNsh,
    TlbFlushVmid,
    TlbFlushVmidRange,
    FlushCpuContext,
    TimerSetCntvoff,
    VgicV3ReadVmcr,
    VgicV3WriteVmcr,
    VgicV3SaveAprs,
    VgicV3RestoreAprs,
    PkvmVcpuInitTraps,
    PkvmInitVm,
    PkvmInitVcpu,
    PkvmTeardownVm,
}

pub const NR_HOST_HCALLS: usize = KvmHostFunc::PkvmTeardownVm as usize + 1;

impl KvmHostFunc {
    /// Value the host puts into `x0` for this call.
    pub const fn smccc_id(self) -> u64 {
        kvm_host_smccc_id(self as u32) as u64
    }
}

const fn host_hcall_table() -> [Option<HcallFn>; NR_HOST_HCALLS] {
    use KvmHostFunc::*;

    let mut t: [Option<HcallFn>; NR_HOST_HCALLS] = [None; NR_HOST_HCALLS];
    t[GetMdcrEl2 as usize] = Some(handle_kvm_get_mdcr_el2);
    t[PkvmInit as usize] = Some(handle_pkvm_init);
    t[PkvmCreatePrivateMapping as usize] = Some(handle_pkvm_create_private_mapping);
    t[PkvmCpuSetVector as usize] = Some(handle_pkvm_cpu_set_vector);
    t[EnableSsbs as usize] = Some(handle_kvm_enable_ssbs);
    t[VgicV3InitLrs as usize] = Some(handle_vgic_v3_init_lrs);
    t[VgicV3GetGicConfig as usize] = Some(handle_vgic_v3_get_gic_config);
    t[PkvmProtFinalize as usize] = Some(handle_pkvm_prot_finalize);
    t[PkvmHostShareHyp as usize] = Some(handle_pkvm_host_share_hyp);
    t[PkvmHostUnshareHyp as usize] = Some(handle_pkvm_host_unshare_hyp);
    t[AdjustPc as usize] = Some(handle_kvm_adjust_pc);
    t[VcpuRun as usize] = Some(handle_kvm_vcpu_run);
    t[FlushVmContext as usize] = Some(handle_kvm_flush_vm_context);
    t[TlbFlushVmidIpa as usize] = Some(handle_kvm_tlb_flush_vmid_ipa);
    t[TlbFlushVmidIpaNsh as usize] = Some(handle_kvm_tlb_flush_vmid_ipa_nsh);
    t[TlbFlushVmid as usize] = Some(handle_kvm_tlb_flush_vmid);
    t[TlbFlushVmidRange as usize] = Some(handle_kvm_tlb_flush_vmid_range);
    t[FlushCpuContext as usize] = Some(handle_kvm_flush_cpu_context);
    t[TimerSetCntvoff as usize] = Some(handle_kvm_timer_set_cntvoff);
    t[VgicV3ReadVmcr as usize] = Some(handle_vgic_v3_read_vmcr);
    t[VgicV3WriteVmcr as usize] = Some(handle_vgic_v3_write_vmcr);
    t[VgicV3SaveAprs as usize] = Some(handle_vgic_v3_save_aprs);
    t[VgicV3RestoreAprs as usize] = Some(handle_vgic_v3_restore_aprs);
    t[PkvmVcpuInitTraps as usize] = Some(handle_pkvm_vcpu_init_traps);
    t[PkvmInitVm as usize] = Some(handle_pkvm_init_vm);
    t[PkvmInitVcpu as usize] = Some(handle_pkvm_init_vcpu);
    t[PkvmTeardownVm as usize] = Some(handle_pkvm_teardown_vm);
    t
}

static HOST_HCALLS: [Option<HcallFn>; NR_HOST_HCALLS] = host_hcall_table();

fn lookup_hcall(hyp: &Hyp<'_>, id: u64) -> Option<HcallFn> {
    // Once protected mode is up only the calls from prot_finalize onwards
    // remain reachable.
    let min = if hyp.protected_mode_initialized() {
        KvmHostFunc::PkvmProtFinalize as u64
    } else {
        0
    };
    if id < min {
        return None;
    }
    let idx = usize::try_from(id).ok()?;
    HOST_HCALLS.get(idx).copied().flatten()
}

/// Dispatches an HVC from the host. Unknown calls get `NOT_SUPPORTED` in
/// `x0` and leave all other registers alone.
pub fn handle_host_hcall(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) {
    let id = (ctxt.reg(0) & !ARM_SMCCC_CALL_HINTS).wrapping_sub(KvmHostFunc::HypInit.smccc_id());

    let Some(hcall) = lookup_hcall(hyp, id) else {
        log::debug!("Unsupported host hypercall {:#x}", ctxt.reg(0));
        ctxt.set_reg(0, SmcccRet::NotSupported.into());
        return;
    };

    ctxt.set_reg(0, SmcccRet::Success.into());
    match hcall(hyp, ctxt) {
        Ok(()) => {}
        Err(HcallError::RequestError(ret)) => ctxt.set_reg(0, ret.into()),
        Err(HcallError::Errno(errno)) => ctxt.set_reg(1, errno.to_reg()),
    }
}
