// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host-visible vCPU state and the allow-listed copies between it and the
//! hypervisor's private vCPU.

use crate::address::HostVirtAddr;
use crate::config::HypVaLayout;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const NR_VGIC_LRS: usize = 16;
pub const NR_SYS_REGS: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserPtRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CpuContext {
    pub regs: UserPtRegs,
    pub sys_regs: [u64; NR_SYS_REGS],
}

/// Syndrome of the last guest exit.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VcpuFault {
    pub esr_el2: u64,
    pub far_el2: u64,
    pub hpfar_el2: u64,
    pub disr_el1: u64,
}

/// GICv3 CPU interface shadow.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VgicV3CpuIf {
    pub vgic_hcr: u32,
    pub vgic_vmcr: u32,
    pub vgic_sre: u32,
    /// Number of valid entries in `vgic_lr`.
    pub used_lrs: u32,
    pub vgic_ap0r: [u32; 4],
    pub vgic_ap1r: [u32; 4],
    pub vgic_lr: [u64; NR_VGIC_LRS],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VcpuArch {
    pub ctxt: CpuContext,
    /// Hyp VA of the SVE register save area.
    pub sve_state: u64,
    pub sve_max_vl: u64,
    /// Stage-2 MMU the vCPU runs on.
    pub hw_mmu: u64,
    pub hcr_el2: u64,
    pub mdcr_el2: u64,
    pub cptr_el2: u64,
    pub iflags: u64,
    pub fp_state: u64,
    pub debug_ptr: u64,
    pub host_fpsimd_state: u64,
    pub vsesr_el2: u64,
    pub fault: VcpuFault,
    pub vgic_cpu: VgicV3CpuIf,
}

/// The host's `struct kvm_vcpu` as far as the hypervisor looks at it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HostVcpu {
    /// Host VA of the owning [`HostKvm`].
    pub kvm: u64,
    pub vcpu_idx: u32,
    pub reserved: u32,
    pub arch: VcpuArch,
}

/// The host's `struct kvm` as far as the hypervisor looks at it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HostKvm {
    pub pkvm_handle: u32,
    pub created_vcpus: u32,
}

impl HostVcpu {
    pub fn kvm_addr(&self) -> HostVirtAddr {
        HostVirtAddr::new(self.kvm)
    }
}

/// Copies the state the host may influence into the private vCPU before a
/// run. Pointers are stored translated but never dereferenced here.
pub fn flush_hyp_vcpu(hyp: &mut VcpuArch, host: &VcpuArch, layout: &HypVaLayout) {
    let hyp_va = |va: u64| layout.kern_hyp_va(HostVirtAddr::new(va)).as_u64();

    hyp.ctxt = host.ctxt;

    hyp.sve_state = hyp_va(host.sve_state);
    hyp.sve_max_vl = host.sve_max_vl;

    hyp.hw_mmu = host.hw_mmu;

    hyp.hcr_el2 = host.hcr_el2;
    hyp.mdcr_el2 = host.mdcr_el2;
    hyp.cptr_el2 = host.cptr_el2;

    hyp.iflags = host.iflags;
    hyp.fp_state = host.fp_state;

    hyp.debug_ptr = hyp_va(host.debug_ptr);
    hyp.host_fpsimd_state = host.host_fpsimd_state;

    hyp.vsesr_el2 = host.vsesr_el2;

    hyp.vgic_cpu = host.vgic_cpu;
}

/// Copies the results of a run back to the host. Only the list registers
/// in use are written.
pub fn sync_hyp_vcpu(host: &mut VcpuArch, hyp: &VcpuArch) {
    host.ctxt = hyp.ctxt;

    host.hcr_el2 = hyp.hcr_el2;
    host.cptr_el2 = hyp.cptr_el2;

    host.fault = hyp.fault;

    host.iflags = hyp.iflags;
    host.fp_state = hyp.fp_state;

    host.vgic_cpu.vgic_hcr = hyp.vgic_cpu.vgic_hcr;
    let used = (hyp.vgic_cpu.used_lrs as usize).min(NR_VGIC_LRS);
    host.vgic_cpu.vgic_lr[..used].copy_from_slice(&hyp.vgic_cpu.vgic_lr[..used]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    fn layout() -> HypVaLayout {
        HypVaLayout {
            host_start: HostVirtAddr::new(0xffff_0000_0000_0000),
            size: 1 << 40,
            va_mask: (1 << 48) - 1,
            tag: 1 << 47,
            phys_start: crate::address::PhysAddr::new(0x4000_0000),
        }
    }

    #[test]
    fn test_flush_allow_list() {
        let mut host = VcpuArch::new_zeroed();
        host.ctxt.regs.regs[3] = 0x33;
        host.sve_state = 0xffff_0000_0010_0000;
        host.debug_ptr = 0xffff_0000_0020_0000;
        host.hcr_el2 = 0x8000_0000;
        host.fault.esr_el2 = 0xdead;
        host.vgic_cpu.used_lrs = 2;

        let mut hyp = VcpuArch::new_zeroed();
        hyp.fault.esr_el2 = 0x1234;
        flush_hyp_vcpu(&mut hyp, &host, &layout());

        assert_eq!(hyp.ctxt.regs.regs[3], 0x33);
        assert_eq!(hyp.sve_state, 0x8000_0010_0000);
        assert_eq!(hyp.debug_ptr, 0x8000_0020_0000);
        assert_eq!(hyp.hcr_el2, 0x8000_0000);
        assert_eq!(hyp.vgic_cpu.used_lrs, 2);
        // The fault record is hypervisor-owned.
        assert_eq!(hyp.fault.esr_el2, 0x1234);
    }

    #[test]
    fn test_sync_used_lrs_only() {
        let mut hyp = VcpuArch::new_zeroed();
        hyp.vgic_cpu.used_lrs = 2;
        hyp.vgic_cpu.vgic_lr = [0xaa; NR_VGIC_LRS];
        hyp.vgic_cpu.vgic_hcr = 1;
        hyp.mdcr_el2 = 0x55;
        hyp.fault.far_el2 = 0x1000;

        let mut host = VcpuArch::new_zeroed();
        sync_hyp_vcpu(&mut host, &hyp);

        assert_eq!(&host.vgic_cpu.vgic_lr[..3], &[0xaa, 0xaa, 0]);
        assert_eq!(host.vgic_cpu.vgic_hcr, 1);
        assert_eq!(host.fault.far_el2, 0x1000);
        // MDCR_EL2 is not reported back.
        assert_eq!(host.mdcr_el2, 0);
    }

    #[test]
    fn test_sync_clamps_used_lrs() {
        let mut hyp = VcpuArch::new_zeroed();
        hyp.vgic_cpu.used_lrs = 1000;
        hyp.vgic_cpu.vgic_lr = [7; NR_VGIC_LRS];
        let mut host = VcpuArch::new_zeroed();
        sync_hyp_vcpu(&mut host, &hyp);
        assert_eq!(host.vgic_cpu.vgic_lr, [7; NR_VGIC_LRS]);
    }
}
