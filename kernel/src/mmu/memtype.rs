// SPDX-License-Identifier: MIT OR Apache-2.0

use cpuarch::ept::{VMX_EPT_IPAT_BIT, VMX_EPT_MT_EPTE_SHIFT};
use cpuarch::mtrr::MtrrType;

/// What the host knows about a physical frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PfnInfo {
    /// The frame has a page descriptor.
    pub valid: bool,
    /// The frame is the shared zero page.
    pub zero_page: bool,
    /// The page descriptor is marked reserved.
    pub reserved: bool,
    pub pat_enabled: bool,
    /// The PAT entry forces UC or WC regardless of MTRRs.
    pub pat_immune_to_uc_mtrr: bool,
    /// The frame is RAM according to the firmware memory map.
    pub e820_ram: bool,
}

/// Whether mappings of the frame must be treated as device memory.
pub fn kvm_is_mmio_pfn(info: &PfnInfo) -> bool {
    if info.valid {
        return !info.zero_page
            && info.reserved
            && (!info.pat_enabled || info.pat_immune_to_uc_mtrr);
    }
    !info.e820_ram
}

/// Per-VM state that decides EPT memory types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemtypePolicy {
    /// A non-coherent DMA device is assigned to the VM.
    pub noncoherent_dma: bool,
    /// The vCPU runs with CR0.CD set.
    pub cr0_cd: bool,
    /// Treat CR0.CD as write-back.
    pub cd_nw_cleared_quirk: bool,
}

impl Default for MemtypePolicy {
    fn default() -> Self {
        Self {
            noncoherent_dma: false,
            cr0_cd: false,
            cd_nw_cleared_quirk: true,
        }
    }
}

const fn mt(ty: MtrrType) -> u64 {
    ty.bits() << VMX_EPT_MT_EPTE_SHIFT
}

/// Memory type and IPAT bits of an EPT leaf. `guest_mtrr` is the type the
/// guest's MTRRs assign to the frame.
pub fn vmx_get_mt_mask(policy: &MemtypePolicy, is_mmio: bool, guest_mtrr: MtrrType) -> u64 {
    if is_mmio {
        return mt(MtrrType::Uncachable);
    }

    // Without non-coherent DMA the guest cannot observe the memory type.
    if !policy.noncoherent_dma {
        return mt(MtrrType::WriteBack) | VMX_EPT_IPAT_BIT;
    }

    if policy.cr0_cd {
        return if policy.cd_nw_cleared_quirk {
            mt(MtrrType::WriteBack) | VMX_EPT_IPAT_BIT
        } else {
            mt(MtrrType::Uncachable) | VMX_EPT_IPAT_BIT
        };
    }

    mt(guest_mtrr)
}
