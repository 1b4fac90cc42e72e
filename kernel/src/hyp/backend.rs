// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::address::{HostVirtAddr, HypVirtAddr, PhysAddr};
use crate::hyp::context::HostCpuContext;
use crate::hyp::vcpu::{VcpuArch, VgicV3CpuIf};
use crate::types::Errno;
use core::fmt::Debug;

/// System registers the trap handlers touch directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysReg {
    CptrEl2,
    CpacrEl1,
    ZcrEl2,
}

/// Four-register result of a call into firmware or the FF-A proxy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmcccRes {
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
}

impl SmcccRes {
    pub fn write_to(&self, ctxt: &mut HostCpuContext) {
        ctxt.set_reg(0, self.a0);
        ctxt.set_reg(1, self.a1);
        ctxt.set_reg(2, self.a2);
        ctxt.set_reg(3, self.a3);
    }
}

/// The machine below the dispatcher: world switch, stage-2 page tables,
/// TLB and GIC maintenance and the firmware conduit. The dispatcher decides
/// what to call; implementations of this trait do it.
pub trait HypBackend: Debug + Sync {
    fn get_mdcr_el2(&self) -> u64;

    fn pkvm_init(
        &self,
        phys: PhysAddr,
        size: u64,
        nr_cpus: u64,
        per_cpu_base: HypVirtAddr,
        hyp_va_bits: u32,
    ) -> Result<(), Errno>;

    /// Maps `size` bytes of `phys` at `addr` in the hypervisor stage-1.
    fn create_mappings(
        &self,
        addr: HypVirtAddr,
        size: u64,
        phys: PhysAddr,
        prot: u64,
    ) -> Result<(), Errno>;

    fn cpu_set_vector(&self, slot: u64) -> Result<(), Errno>;
    fn enable_ssbs(&self);

    fn vgic_v3_init_lrs(&self);
    fn vgic_v3_get_gic_config(&self) -> u64;
    fn vgic_v3_read_vmcr(&self) -> u64;
    fn vgic_v3_write_vmcr(&self, vmcr: u32);
    fn vgic_v3_save_aprs(&self, cpu_if: &mut VgicV3CpuIf);
    fn vgic_v3_restore_aprs(&self, cpu_if: &VgicV3CpuIf);

    /// Installs the host stage-2 on `cpu` once protection is finalized.
    fn enable_host_stage2(&self, cpu: usize);

    fn adjust_pc(&self, vcpu: &mut VcpuArch);
    /// World switch into the guest. Returns the exit code.
    fn vcpu_run(&self, vcpu: &mut VcpuArch) -> i32;
    fn vcpu_init_traps(&self, vcpu: &mut VcpuArch);

    fn flush_vm_context(&self);
    fn tlb_flush_vmid_ipa(&self, mmu: u64, ipa: u64, level: i32);
    fn tlb_flush_vmid_ipa_nsh(&self, mmu: u64, ipa: u64, level: i32);
    fn tlb_flush_vmid(&self, mmu: u64);
    fn tlb_flush_vmid_range(&self, mmu: u64, start: u64, pages: u64);
    fn flush_cpu_context(&self, mmu: u64);
    fn timer_set_cntvoff(&self, cntvoff: u64);

    /// Sets up the stage-2 of a new protected VM rooted at `pgd`.
    fn prepare_guest_stage2(&self, handle: u32, pgd: HostVirtAddr) -> Result<(), Errno>;
    fn teardown_guest_stage2(&self, handle: u32);

    fn handle_host_mem_abort(&self, ctxt: &mut HostCpuContext);

    /// Passes an SMC the hypervisor does not handle to firmware unchanged.
    fn forward_smc(&self, ctxt: &mut HostCpuContext);
    fn psci_call(&self, func_id: u32, arg0: u64, arg1: u64, arg2: u64) -> u64;
    fn ffa_mem_op(&self, func_id: u32, ctxt: &HostCpuContext) -> SmcccRes;

    fn read_sysreg(&self, reg: SysReg) -> u64;
    fn write_sysreg(&self, reg: SysReg, val: u64);
    fn isb(&self);
}
