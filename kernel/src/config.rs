// SPDX-License-Identifier: MIT OR Apache-2.0

extern crate alloc;

use crate::address::{Address, HostVirtAddr, HypVirtAddr, PhysAddr};
use crate::error::HypError;
use crate::types::{MAX_CPUS, PAGE_SIZE};
use alloc::vec::Vec;
use cpuarch::psci::{psci_version, MPIDR_HWID_BITMASK};

/// How host kernel virtual addresses map into the hypervisor.
///
/// The hypervisor mirrors the host's linear map: a host VA inside the window
/// translates by keeping the bits in `va_mask` and ORing in `tag`, and the
/// physical address behind it is a constant offset away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HypVaLayout {
    /// First host VA of the mirrored linear map.
    pub host_start: HostVirtAddr,
    /// Size of the mirrored window in bytes.
    pub size: u64,
    pub va_mask: u64,
    pub tag: u64,
    /// Physical address backing `host_start`.
    pub phys_start: PhysAddr,
}

impl HypVaLayout {
    /// A layout where hypervisor and host addresses coincide and the linear
    /// map starts at physical address zero.
    pub const fn identity(host_start: HostVirtAddr, size: u64) -> Self {
        Self {
            host_start,
            size,
            va_mask: u64::MAX,
            tag: 0,
            phys_start: PhysAddr::new(host_start.as_u64()),
        }
    }

    /// Translation without a window check, for values the hypervisor only
    /// stores and never dereferences.
    pub fn kern_hyp_va(&self, va: HostVirtAddr) -> HypVirtAddr {
        HypVirtAddr::from((va.bits() & self.va_mask) | self.tag)
    }

    /// Whether `[va, va + len)` lies inside the mirrored window.
    pub fn contains(&self, va: HostVirtAddr, len: u64) -> bool {
        let Some(end) = va.bits().checked_add(len) else {
            return false;
        };
        let win_end = self.host_start.bits().saturating_add(self.size);
        va >= self.host_start && end <= win_end
    }

    /// Physical address behind a host linear-map VA.
    pub fn host_pa(&self, va: HostVirtAddr) -> Option<PhysAddr> {
        let off = va.bits().checked_sub(self.host_start.bits())?;
        self.phys_start.checked_add(off)
    }
}

/// Static description of one CPU, handed over by the host at init.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuConfig {
    /// Affinity fields of MPIDR_EL1.
    pub mpidr: u64,
    /// Physical address of this CPU's init parameter block.
    pub init_params: PhysAddr,
}

/// PSCI relay parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PsciConfig {
    /// Version reported by firmware.
    pub version: u32,
    /// Physical address of the hypervisor's CPU_ON entry point.
    pub cpu_entry: PhysAddr,
    /// Physical address of the hypervisor's CPU_SUSPEND resume point.
    pub cpu_resume: PhysAddr,
}

impl Default for PsciConfig {
    fn default() -> Self {
        Self {
            version: psci_version(1, 1),
            cpu_entry: PhysAddr::null(),
            cpu_resume: PhysAddr::null(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HypConfig {
    /// Whether the host is deprivileged (protected KVM).
    pub protected_mode: bool,
    /// Whether the hypervisor runs with HCR_EL2.E2H set (hVHE).
    pub has_hvhe: bool,
    pub va_layout: HypVaLayout,
    /// Range handed out by `__pkvm_create_private_mapping`.
    pub private_va_start: HypVirtAddr,
    pub private_va_end: HypVirtAddr,
    pub cpus: Vec<CpuConfig>,
    pub psci: PsciConfig,
}

impl HypConfig {
    pub fn nr_cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Sanity-checks the boot parameters before any CPU enters the
    /// dispatcher.
    pub fn validate(&self) -> Result<(), HypError> {
        if self.cpus.is_empty() || self.cpus.len() > MAX_CPUS {
            return Err(HypError::InvalidAddress);
        }
        if self.cpus.iter().any(|c| c.mpidr & !MPIDR_HWID_BITMASK != 0) {
            return Err(HypError::InvalidAddress);
        }
        if !self.private_va_start.is_page_aligned()
            || !self.private_va_end.is_page_aligned()
            || self.private_va_start.is_null()
            || self.private_va_end <= self.private_va_start
        {
            return Err(HypError::InvalidAddress);
        }
        if self.va_layout.size < PAGE_SIZE {
            return Err(HypError::InvalidAddress);
        }
        Ok(())
    }
}

/// Boot-time inputs to the SPTE mask selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpteConfig {
    /// Physical address width reported by CPUID.
    pub phys_bits: u32,
    /// Physical address width usable in SPTEs (reduced by memory encryption).
    pub shadow_phys_bits: u32,
    /// Physical address width the L1 cache is indexed with.
    pub cache_bits: u32,
    /// Whether the CPU is affected by L1 terminal fault.
    pub has_l1tf: bool,
    /// Module parameter: allow caching of MMIO SPTEs.
    pub allow_mmio_caching: bool,
}

impl Default for SpteConfig {
    fn default() -> Self {
        Self {
            phys_bits: 46,
            shadow_phys_bits: 46,
            cache_bits: 46,
            has_l1tf: false,
            allow_mmio_caching: true,
        }
    }
}
