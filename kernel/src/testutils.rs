// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fakes and fixtures shared by the unit tests.

extern crate alloc;

use crate::address::{HostVirtAddr, HypVirtAddr, PhysAddr};
use crate::config::{CpuConfig, HypConfig, HypVaLayout, PsciConfig, SpteConfig};
use crate::hyp::backend::{HypBackend, SmcccRes, SysReg};
use crate::hyp::context::HostCpuContext;
use crate::hyp::vcpu::{HostKvm, HostVcpu, VcpuArch, VgicV3CpuIf};
use crate::hyp::Hyp;
use crate::locking::SpinLock;
use crate::mmu::memtype::{vmx_get_mt_mask, MemtypePolicy};
use crate::mmu::masks::PagingMode;
use crate::mmu::rsvd::LegacyRsvdParams;
use crate::mmu::{Gfn, KvmPfn, MmuContext, PfnInfo, PgLevel, ReservedBits, SpteMasks, UnsyncError};
use crate::types::{Errno, PAGE_SHIFT, PAGE_SIZE};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::size_of;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use cpuarch::esr::{Esr, ESR_ELX_EC_HVC64, ESR_ELX_EC_SMC64};
use cpuarch::ffa::FFA_SUCCESS;
use cpuarch::mtrr::MtrrType;
use cpuarch::psci::psci_version;
use zerocopy::FromZeros;

pub fn legacy_masks() -> SpteMasks {
    SpteMasks::reset_all(&SpteConfig::default())
}

/// Legacy masks on an L1TF-affected CPU whose cache is indexed with fewer
/// bits than the physical address width.
pub fn legacy_masks_l1tf() -> SpteMasks {
    SpteMasks::reset_all(&SpteConfig {
        cache_bits: 44,
        has_l1tf: true,
        ..Default::default()
    })
}

pub fn ept_masks(has_ad_bits: bool, has_exec_only: bool) -> SpteMasks {
    let mut m = legacy_masks();
    m.set_ept_masks(has_ad_bits, has_exec_only);
    m
}

/// MMU context that records the side effects the encoder asks for.
#[derive(Debug)]
pub struct FakeMmu {
    pub nx_huge_pages: bool,
    /// Classify every frame as MMIO.
    pub mmio_pfns: bool,
    pub ept: bool,
    pub memtype: MemtypePolicy,
    pub guest_mtrr: MtrrType,
    pub unsync_result: Result<(), UnsyncError>,
    pub unsync_calls: Vec<(Gfn, bool, bool)>,
    pub dirty_gfns: Vec<Gfn>,
    pub accessed_pfns: Vec<KvmPfn>,
    pub dirty_pfns: Vec<KvmPfn>,
    pub rsvd: ReservedBits,
    pub generation: u64,
    pub mmio_value: u64,
}

impl FakeMmu {
    pub fn new(m: &SpteMasks) -> Self {
        let (ept, mut rsvd) = match m.mode() {
            PagingMode::Ept { has_exec_only, .. } => {
                (true, ReservedBits::ept(m.phys_bits, has_exec_only, PgLevel::L1G))
            }
            PagingMode::Legacy => (
                false,
                ReservedBits::legacy(&LegacyRsvdParams {
                    phys_bits: m.phys_bits,
                    root_level: PgLevel::L512G,
                    nx: true,
                    gbpages: true,
                    amd: false,
                }),
            ),
        };
        rsvd.apply_me_mask(m.me_value, m.me_mask);

        Self {
            nx_huge_pages: false,
            mmio_pfns: false,
            ept,
            memtype: MemtypePolicy::default(),
            guest_mtrr: MtrrType::WriteBack,
            unsync_result: Ok(()),
            unsync_calls: Vec::new(),
            dirty_gfns: Vec::new(),
            accessed_pfns: Vec::new(),
            dirty_pfns: Vec::new(),
            rsvd,
            generation: 0,
            mmio_value: m.mmio_value,
        }
    }
}

impl MmuContext for FakeMmu {
    fn nx_huge_page_enabled(&self) -> bool {
        self.nx_huge_pages
    }

    fn pfn_info(&self, _pfn: KvmPfn) -> PfnInfo {
        if self.mmio_pfns {
            PfnInfo::default()
        } else {
            PfnInfo {
                valid: true,
                e820_ram: true,
                ..Default::default()
            }
        }
    }

    fn mt_mask(&self, _gfn: Gfn, is_mmio: bool) -> u64 {
        if self.ept {
            vmx_get_mt_mask(&self.memtype, is_mmio, self.guest_mtrr)
        } else {
            0
        }
    }

    fn try_to_unsync_pages(
        &mut self,
        gfn: Gfn,
        can_unsync: bool,
        prefetch: bool,
    ) -> Result<(), UnsyncError> {
        self.unsync_calls.push((gfn, can_unsync, prefetch));
        self.unsync_result
    }

    fn mark_page_dirty_in_slot(&mut self, gfn: Gfn) {
        self.dirty_gfns.push(gfn);
    }

    fn shadow_zero_check(&self) -> &ReservedBits {
        &self.rsvd
    }

    fn memslots_generation(&self) -> u64 {
        self.generation
    }

    fn shadow_mmio_value(&self) -> u64 {
        self.mmio_value
    }

    fn set_pfn_accessed(&mut self, pfn: KvmPfn) {
        self.accessed_pfns.push(pfn);
    }

    fn set_pfn_dirty(&mut self, pfn: KvmPfn) {
        self.dirty_pfns.push(pfn);
    }
}

/// Small deterministic generator for randomized tests.
#[derive(Debug)]
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish value in `0..n`.
    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}

pub const TEST_CPU_ENTRY: u64 = 0x4000_1000;
pub const TEST_CPU_RESUME: u64 = 0x4000_2000;
pub const TEST_NR_CPUS: u64 = 4;

/// Protected-mode configuration with four CPUs and a host window where host
/// VA, hyp VA and PA coincide, so tests can hand out pointers to their own
/// objects.
pub fn test_hyp_config() -> HypConfig {
    HypConfig {
        protected_mode: true,
        has_hvhe: false,
        va_layout: HypVaLayout::identity(HostVirtAddr::new(PAGE_SIZE), u64::MAX - PAGE_SIZE),
        private_va_start: HypVirtAddr::new(0x7000_0000_0000),
        private_va_end: HypVirtAddr::new(0x7000_0010_0000),
        cpus: (0..TEST_NR_CPUS)
            .map(|i| CpuConfig {
                mpidr: i,
                init_params: PhysAddr::new(0x8000_0000 + i * PAGE_SIZE),
            })
            .collect(),
        psci: PsciConfig {
            version: psci_version(1, 1),
            cpu_entry: PhysAddr::new(TEST_CPU_ENTRY),
            cpu_resume: PhysAddr::new(TEST_CPU_RESUME),
        },
    }
}

pub fn hvc_ctxt(cpu: usize, x0: u64) -> HostCpuContext {
    let mut ctxt = HostCpuContext::new(cpu, Esr::from_class(ESR_ELX_EC_HVC64));
    ctxt.set_reg(0, x0);
    ctxt
}

pub fn smc_ctxt(cpu: usize, x0: u64) -> HostCpuContext {
    let mut ctxt = HostCpuContext::new(cpu, Esr::from_class(ESR_ELX_EC_SMC64));
    ctxt.set_reg(0, x0);
    ctxt
}

/// A host object alone on its own page(s), so sharing it does not share
/// anything else.
#[repr(C, align(4096))]
#[derive(Debug)]
pub struct HostPage<T>(pub T);

impl<T> HostPage<T> {
    pub fn va(&self) -> HostVirtAddr {
        HostVirtAddr::new(&self.0 as *const T as u64)
    }
}

impl<T> Deref for HostPage<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for HostPage<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

pub fn host_kvm(created_vcpus: u32) -> (Box<HostPage<HostKvm>>, HostVirtAddr) {
    let kvm = Box::new(HostPage(HostKvm {
        pkvm_handle: 0,
        created_vcpus,
    }));
    let va = kvm.va();
    (kvm, va)
}

pub fn host_vcpu(kvm: HostVirtAddr, vcpu_idx: u32) -> (Box<HostPage<HostVcpu>>, HostVirtAddr) {
    let mut vcpu = Box::new(HostPage(HostVcpu::new_zeroed()));
    vcpu.kvm = u64::from(kvm);
    vcpu.vcpu_idx = vcpu_idx;
    let va = vcpu.va();
    (vcpu, va)
}

/// Shares every page `obj` lives on with the hypervisor, the way the host
/// does before passing a pointer to it.
pub fn share_object<T>(hyp: &Hyp<'_>, obj: &T) {
    let start = obj as *const T as u64;
    let end = start + size_of::<T>().max(1) as u64 - 1;
    for pfn in (start >> PAGE_SHIFT)..=(end >> PAGE_SHIFT) {
        // Pages shared by an earlier object stay shared.
        let _ = hyp.host_share_hyp(pfn);
    }
}

/// Backend that records what the dispatcher asked for.
#[derive(Debug, Default)]
pub struct TestBackend {
    calls: SpinLock<Vec<&'static str>>,
    psci_calls: SpinLock<Vec<(u32, u64, u64, u64)>>,
    psci_ret: AtomicU64,
    sysregs: SpinLock<[u64; 3]>,
    mappings: SpinLock<Vec<(HypVirtAddr, u64, PhysAddr, u64)>>,
    fail_mappings: AtomicBool,
}

impl TestBackend {
    pub const MDCR_EL2: u64 = 0x1f;
    pub const GIC_CONFIG: u64 = 0x8000_0010;
    pub const VMCR: u64 = 0x4_0001;
    /// Exit code of every guest run.
    pub const RUN_EXIT: i32 = 1;
    /// ESR_EL2 recorded by every guest run.
    pub const RUN_ESR: u64 = 0x9200_0046;
    pub const INIT_HCR: u64 = 0x8000_0001;

    fn record(&self, name: &'static str) {
        self.calls.lock().push(name);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn psci_calls(&self) -> Vec<(u32, u64, u64, u64)> {
        self.psci_calls.lock().clone()
    }

    pub fn set_psci_ret(&self, val: u64) {
        self.psci_ret.store(val, Ordering::Relaxed);
    }

    pub fn mappings(&self) -> Vec<(HypVirtAddr, u64, PhysAddr, u64)> {
        self.mappings.lock().clone()
    }

    pub fn set_fail_mappings(&self, fail: bool) {
        self.fail_mappings.store(fail, Ordering::Relaxed);
    }

    fn sysreg_idx(reg: SysReg) -> usize {
        match reg {
            SysReg::CptrEl2 => 0,
            SysReg::CpacrEl1 => 1,
            SysReg::ZcrEl2 => 2,
        }
    }

    pub fn sysreg(&self, reg: SysReg) -> u64 {
        self.sysregs.lock()[Self::sysreg_idx(reg)]
    }

    pub fn set_sysreg(&self, reg: SysReg, val: u64) {
        self.sysregs.lock()[Self::sysreg_idx(reg)] = val;
    }
}

impl HypBackend for TestBackend {
    fn get_mdcr_el2(&self) -> u64 {
        self.record("get_mdcr_el2");
        Self::MDCR_EL2
    }

    fn pkvm_init(
        &self,
        _phys: PhysAddr,
        _size: u64,
        nr_cpus: u64,
        _per_cpu_base: HypVirtAddr,
        _hyp_va_bits: u32,
    ) -> Result<(), Errno> {
        self.record("pkvm_init");
        if nr_cpus > TEST_NR_CPUS {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    fn create_mappings(
        &self,
        addr: HypVirtAddr,
        size: u64,
        phys: PhysAddr,
        prot: u64,
    ) -> Result<(), Errno> {
        self.record("create_mappings");
        if self.fail_mappings.load(Ordering::Relaxed) {
            return Err(Errno::ENOMEM);
        }
        self.mappings.lock().push((addr, size, phys, prot));
        Ok(())
    }

    fn cpu_set_vector(&self, slot: u64) -> Result<(), Errno> {
        self.record("cpu_set_vector");
        if slot > 3 {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    fn enable_ssbs(&self) {
        self.record("enable_ssbs");
    }

    fn vgic_v3_init_lrs(&self) {
        self.record("vgic_v3_init_lrs");
    }

    fn vgic_v3_get_gic_config(&self) -> u64 {
        self.record("vgic_v3_get_gic_config");
        Self::GIC_CONFIG
    }

    fn vgic_v3_read_vmcr(&self) -> u64 {
        self.record("vgic_v3_read_vmcr");
        Self::VMCR
    }

    fn vgic_v3_write_vmcr(&self, _vmcr: u32) {
        self.record("vgic_v3_write_vmcr");
    }

    fn vgic_v3_save_aprs(&self, cpu_if: &mut VgicV3CpuIf) {
        self.record("vgic_v3_save_aprs");
        cpu_if.vgic_ap0r = [1, 2, 3, 4];
    }

    fn vgic_v3_restore_aprs(&self, _cpu_if: &VgicV3CpuIf) {
        self.record("vgic_v3_restore_aprs");
    }

    fn enable_host_stage2(&self, _cpu: usize) {
        self.record("enable_host_stage2");
    }

    fn adjust_pc(&self, vcpu: &mut VcpuArch) {
        self.record("adjust_pc");
        vcpu.ctxt.regs.pc += 4;
    }

    fn vcpu_run(&self, vcpu: &mut VcpuArch) -> i32 {
        self.record("vcpu_run");
        vcpu.ctxt.regs.pc += 4;
        vcpu.ctxt.regs.regs[0] = vcpu.hcr_el2;
        vcpu.fault.esr_el2 = Self::RUN_ESR;
        vcpu.mdcr_el2 = 0xdead;
        for (i, lr) in vcpu.vgic_cpu.vgic_lr.iter_mut().enumerate() {
            *lr = 0xa0 + i as u64;
        }
        Self::RUN_EXIT
    }

    fn vcpu_init_traps(&self, vcpu: &mut VcpuArch) {
        self.record("vcpu_init_traps");
        vcpu.hcr_el2 = Self::INIT_HCR;
    }

    fn flush_vm_context(&self) {
        self.record("flush_vm_context");
    }

    fn tlb_flush_vmid_ipa(&self, _mmu: u64, _ipa: u64, _level: i32) {
        self.record("tlb_flush_vmid_ipa");
    }

    fn tlb_flush_vmid_ipa_nsh(&self, _mmu: u64, _ipa: u64, _level: i32) {
        self.record("tlb_flush_vmid_ipa_nsh");
    }

    fn tlb_flush_vmid(&self, _mmu: u64) {
        self.record("tlb_flush_vmid");
    }

    fn tlb_flush_vmid_range(&self, _mmu: u64, _start: u64, _pages: u64) {
        self.record("tlb_flush_vmid_range");
    }

    fn flush_cpu_context(&self, _mmu: u64) {
        self.record("flush_cpu_context");
    }

    fn timer_set_cntvoff(&self, _cntvoff: u64) {
        self.record("timer_set_cntvoff");
    }

    fn prepare_guest_stage2(&self, _handle: u32, _pgd: HostVirtAddr) -> Result<(), Errno> {
        self.record("prepare_guest_stage2");
        Ok(())
    }

    fn teardown_guest_stage2(&self, _handle: u32) {
        self.record("teardown_guest_stage2");
    }

    fn handle_host_mem_abort(&self, _ctxt: &mut HostCpuContext) {
        self.record("handle_host_mem_abort");
    }

    fn forward_smc(&self, _ctxt: &mut HostCpuContext) {
        self.record("forward_smc");
    }

    fn psci_call(&self, func_id: u32, arg0: u64, arg1: u64, arg2: u64) -> u64 {
        self.record("psci_call");
        self.psci_calls.lock().push((func_id, arg0, arg1, arg2));
        self.psci_ret.load(Ordering::Relaxed)
    }

    fn ffa_mem_op(&self, func_id: u32, _ctxt: &HostCpuContext) -> SmcccRes {
        self.record("ffa_mem_op");
        SmcccRes {
            a0: FFA_SUCCESS.into(),
            a2: func_id.into(),
            ..Default::default()
        }
    }

    fn read_sysreg(&self, reg: SysReg) -> u64 {
        self.sysreg(reg)
    }

    fn write_sysreg(&self, reg: SysReg, val: u64) {
        self.record("write_sysreg");
        self.set_sysreg(reg, val);
    }

    fn isb(&self) {
        self.record("isb");
    }
}
