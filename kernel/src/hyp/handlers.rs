// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host hypercall handlers. Argument `n` is taken from `x<n>`; the primary
//! result goes to `x1`.

use crate::address::{HostVirtAddr, PhysAddr};
use crate::hyp::context::{declare_reg, HostCpuContext, IntoReg};
use crate::hyp::errors::HcallError;
use crate::hyp::mem::encode_err_ptr;
use crate::hyp::vcpu::{flush_hyp_vcpu, sync_hyp_vcpu, HostKvm, HostVcpu, VgicV3CpuIf};
use crate::hyp::Hyp;
use crate::types::Errno;
use core::mem::size_of;
use core::sync::atomic::Ordering;

pub type HcallFn = fn(&Hyp<'_>, &mut HostCpuContext) -> Result<(), HcallError>;

fn set_ret(ctxt: &mut HostCpuContext, val: impl IntoReg) {
    ctxt.set_reg(1, val.into_reg());
}

pub fn handle_kvm_get_mdcr_el2(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    set_ret(ctxt, hyp.backend.get_mdcr_el2());
    Ok(())
}

pub fn handle_pkvm_init(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    declare_reg!(PhysAddr, phys, ctxt, 1);
    declare_reg!(u64, size, ctxt, 2);
    declare_reg!(u64, nr_cpus, ctxt, 3);
    declare_reg!(HostVirtAddr, per_cpu_base, ctxt, 4);
    declare_reg!(u32, hyp_va_bits, ctxt, 5);

    let per_cpu_base = hyp.host_va_to_hyp(per_cpu_base, size_of::<u64>() as u64)?;
    hyp.backend
        .pkvm_init(phys, size, nr_cpus, per_cpu_base, hyp_va_bits)?;
    set_ret(ctxt, 0u64);
    Ok(())
}

/// The mapping's address is returned in `x1`, or an error folded into the
/// same register. Writing it through a host pointer would not work: the
/// hypervisor cannot produce an address the host can dereference.
pub fn handle_pkvm_create_private_mapping(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(PhysAddr, phys, ctxt, 1);
    declare_reg!(u64, size, ctxt, 2);
    declare_reg!(u64, prot, ctxt, 3);

    let res = hyp
        .create_private_mapping(phys, size, prot)
        .map_err(Errno::from);
    set_ret(ctxt, encode_err_ptr(res));
    Ok(())
}

pub fn handle_pkvm_cpu_set_vector(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, slot, ctxt, 1);
    set_ret(ctxt, hyp.backend.cpu_set_vector(slot));
    Ok(())
}

pub fn handle_kvm_enable_ssbs(hyp: &Hyp<'_>, _ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    hyp.backend.enable_ssbs();
    Ok(())
}

pub fn handle_vgic_v3_init_lrs(
    hyp: &Hyp<'_>,
    _ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    hyp.backend.vgic_v3_init_lrs();
    Ok(())
}

pub fn handle_vgic_v3_get_gic_config(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    set_ret(ctxt, hyp.backend.vgic_v3_get_gic_config());
    Ok(())
}

/// One-shot per CPU: moves the calling CPU onto the host stage-2.
pub fn handle_pkvm_prot_finalize(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    let cpu = ctxt.cpu;
    let percpu = hyp.percpu(cpu).ok_or(Errno::EINVAL)?;

    if percpu
        .prot_finalized
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
        .is_err()
    {
        return Err(Errno::EPERM.into());
    }

    hyp.backend.enable_host_stage2(cpu);
    log::info!("pKVM: CPU {} finalized host protection", cpu);
    set_ret(ctxt, 0u64);
    Ok(())
}

pub fn handle_pkvm_host_share_hyp(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, pfn, ctxt, 1);
    hyp.host_share_hyp(pfn)?;
    set_ret(ctxt, 0u64);
    Ok(())
}

pub fn handle_pkvm_host_unshare_hyp(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, pfn, ctxt, 1);
    hyp.host_unshare_hyp(pfn)?;
    set_ret(ctxt, 0u64);
    Ok(())
}

pub fn handle_kvm_adjust_pc(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    declare_reg!(HostVirtAddr, vcpu, ctxt, 1);

    let ptr = hyp.host_ptr::<HostVcpu>(vcpu)?;
    // SAFETY: translated and bounds-checked by host_ptr().
    let mut host = unsafe { ptr.read() };
    hyp.backend.adjust_pc(&mut host.arch);
    // SAFETY: as above.
    unsafe { ptr.write(host) };
    Ok(())
}

/// Runs a protected vCPU: check it out, copy in what the host may
/// influence, run, copy back the results. The checkout is put back when
/// `loaded` goes out of scope, whatever the run returned.
fn run_protected_vcpu(hyp: &Hyp<'_>, host_vcpu: HostVirtAddr) -> Result<i32, Errno> {
    let ptr = hyp
        .host_ptr::<HostVcpu>(host_vcpu)
        .map_err(|_| Errno::EINVAL)?;
    if !hyp.host_range_shared(host_vcpu, size_of::<HostVcpu>() as u64) {
        return Err(Errno::EINVAL);
    }
    // SAFETY: translated by host_ptr() and shared with the hypervisor.
    let host = unsafe { ptr.read() };

    let kvm_va = host.kvm_addr();
    let kvm_ptr = hyp
        .host_ptr::<HostKvm>(kvm_va)
        .map_err(|_| Errno::EINVAL)?;
    if !hyp.host_range_shared(kvm_va, size_of::<HostKvm>() as u64) {
        return Err(Errno::EINVAL);
    }
    // SAFETY: as above.
    let kvm = unsafe { kvm_ptr.read() };

    let loaded = hyp
        .load_hyp_vcpu(kvm.pkvm_handle, host.vcpu_idx)
        .ok_or(Errno::EINVAL)?;
    let mut vcpu = loaded.vcpu();

    // Copy from the host vCPU registered at init, not from whatever the
    // host passed in this time.
    // SAFETY: the registered host vCPU is pinned for the VM's lifetime.
    let mut shadow_host = unsafe { vcpu.host_vcpu.read() };
    flush_hyp_vcpu(&mut vcpu.arch, &shadow_host.arch, &hyp.config.va_layout);

    let ret = hyp.backend.vcpu_run(&mut vcpu.arch);

    sync_hyp_vcpu(&mut shadow_host.arch, &vcpu.arch);
    // SAFETY: as above.
    unsafe { vcpu.host_vcpu.write(shadow_host) };

    Ok(ret)
}

fn run_host_vcpu(hyp: &Hyp<'_>, host_vcpu: HostVirtAddr) -> Result<i32, Errno> {
    let ptr = hyp
        .host_ptr::<HostVcpu>(host_vcpu)
        .map_err(|_| Errno::EINVAL)?;
    // SAFETY: translated and bounds-checked by host_ptr().
    let mut host = unsafe { ptr.read() };
    let ret = hyp.backend.vcpu_run(&mut host.arch);
    // SAFETY: as above.
    unsafe { ptr.write(host) };
    Ok(ret)
}

pub fn handle_kvm_vcpu_run(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    declare_reg!(HostVirtAddr, host_vcpu, ctxt, 1);

    let ret = if hyp.config.protected_mode {
        run_protected_vcpu(hyp, host_vcpu)?
    } else {
        run_host_vcpu(hyp, host_vcpu)?
    };
    set_ret(ctxt, ret);
    Ok(())
}

pub fn handle_kvm_flush_vm_context(
    hyp: &Hyp<'_>,
    _ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    hyp.backend.flush_vm_context();
    Ok(())
}

pub fn handle_kvm_tlb_flush_vmid_ipa(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, mmu, ctxt, 1);
    declare_reg!(u64, ipa, ctxt, 2);
    declare_reg!(i32, level, ctxt, 3);
    hyp.backend
        .tlb_flush_vmid_ipa(hyp.kern_hyp_va(mmu), ipa, level);
    Ok(())
}

pub fn handle_kvm_tlb_flush_vmid_ipa_nsh(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, mmu, ctxt, 1);
    declare_reg!(u64, ipa, ctxt, 2);
    declare_reg!(i32, level, ctxt, 3);
    hyp.backend
        .tlb_flush_vmid_ipa_nsh(hyp.kern_hyp_va(mmu), ipa, level);
    Ok(())
}

pub fn handle_kvm_tlb_flush_vmid(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, mmu, ctxt, 1);
    hyp.backend.tlb_flush_vmid(hyp.kern_hyp_va(mmu));
    Ok(())
}

pub fn handle_kvm_tlb_flush_vmid_range(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, mmu, ctxt, 1);
    declare_reg!(u64, start, ctxt, 2);
    declare_reg!(u64, pages, ctxt, 3);
    hyp.backend
        .tlb_flush_vmid_range(hyp.kern_hyp_va(mmu), start, pages);
    Ok(())
}

pub fn handle_kvm_flush_cpu_context(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, mmu, ctxt, 1);
    hyp.backend.flush_cpu_context(hyp.kern_hyp_va(mmu));
    Ok(())
}

pub fn handle_kvm_timer_set_cntvoff(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u64, cntvoff, ctxt, 1);
    hyp.backend.timer_set_cntvoff(cntvoff);
    Ok(())
}

pub fn handle_vgic_v3_read_vmcr(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    set_ret(ctxt, hyp.backend.vgic_v3_read_vmcr());
    Ok(())
}

pub fn handle_vgic_v3_write_vmcr(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u32, vmcr, ctxt, 1);
    hyp.backend.vgic_v3_write_vmcr(vmcr);
    Ok(())
}

pub fn handle_vgic_v3_save_aprs(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(HostVirtAddr, cpu_if, ctxt, 1);

    let ptr = hyp.host_ptr::<VgicV3CpuIf>(cpu_if)?;
    // SAFETY: translated and bounds-checked by host_ptr().
    let mut val = unsafe { ptr.read() };
    hyp.backend.vgic_v3_save_aprs(&mut val);
    // SAFETY: as above.
    unsafe { ptr.write(val) };
    Ok(())
}

pub fn handle_vgic_v3_restore_aprs(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(HostVirtAddr, cpu_if, ctxt, 1);

    let ptr = hyp.host_ptr::<VgicV3CpuIf>(cpu_if)?;
    // SAFETY: translated and bounds-checked by host_ptr().
    let val = unsafe { ptr.read() };
    hyp.backend.vgic_v3_restore_aprs(&val);
    Ok(())
}

pub fn handle_pkvm_vcpu_init_traps(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(HostVirtAddr, vcpu, ctxt, 1);

    let ptr = hyp.host_ptr::<HostVcpu>(vcpu)?;
    // SAFETY: translated and bounds-checked by host_ptr().
    let mut host = unsafe { ptr.read() };
    hyp.backend.vcpu_init_traps(&mut host.arch);
    // SAFETY: as above.
    unsafe { ptr.write(host) };
    Ok(())
}

fn require_protected(hyp: &Hyp<'_>) -> Result<(), HcallError> {
    if hyp.config.protected_mode {
        Ok(())
    } else {
        Err(HcallError::not_supported())
    }
}

pub fn handle_pkvm_init_vm(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    declare_reg!(HostVirtAddr, host_kvm, ctxt, 1);
    declare_reg!(HostVirtAddr, vm_hva, ctxt, 2);
    declare_reg!(HostVirtAddr, pgd_hva, ctxt, 3);

    require_protected(hyp)?;
    let handle = hyp.init_vm(host_kvm, vm_hva, pgd_hva)?;
    set_ret(ctxt, handle);
    Ok(())
}

pub fn handle_pkvm_init_vcpu(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) -> Result<(), HcallError> {
    declare_reg!(u32, handle, ctxt, 1);
    declare_reg!(HostVirtAddr, host_vcpu, ctxt, 2);
    declare_reg!(HostVirtAddr, vcpu_hva, ctxt, 3);

    require_protected(hyp)?;
    hyp.init_vcpu(handle, host_vcpu, vcpu_hva)?;
    set_ret(ctxt, 0u64);
    Ok(())
}

pub fn handle_pkvm_teardown_vm(
    hyp: &Hyp<'_>,
    ctxt: &mut HostCpuContext,
) -> Result<(), HcallError> {
    declare_reg!(u32, handle, ctxt, 1);

    require_protected(hyp)?;
    hyp.teardown_vm(handle)?;
    set_ret(ctxt, 0u64);
    Ok(())
}
