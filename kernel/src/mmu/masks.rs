// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::config::SpteConfig;
use crate::mmu::AccessRights;
use crate::types::PAGE_SHIFT;
use crate::utils::immut_after_init::{ImmutAfterInitCell, ImmutAfterInitResult};
use crate::utils::{genmask, rsvd_bits};
use cpuarch::ept::{
    VMX_EPT_ACCESS_BIT, VMX_EPT_DIRTY_BIT, VMX_EPT_EXECUTABLE_MASK, VMX_EPT_IPAT_BIT,
    VMX_EPT_MISCONFIG_WX_VALUE, VMX_EPT_MT_MASK, VMX_EPT_READABLE_MASK, VMX_EPT_RWX_MASK,
};
use cpuarch::paging::{
    MAX_PHYS_BITS, PT64_NX_MASK, PT_ACCESSED_MASK, PT_DIRTY_MASK, PT_PRESENT_MASK, PT_USER_MASK,
};

/// Software bit marking an entry as shadow-present, independent of the
/// hardware present/RWX bits.
pub const SPTE_MMU_PRESENT_MASK: u64 = 1 << 11;

/// Two-bit field recording how accessed/dirty state is tracked.
pub const SPTE_TDP_AD_SHIFT: u32 = 52;
pub const SPTE_TDP_AD_MASK: u64 = 3 << SPTE_TDP_AD_SHIFT;
pub const SPTE_TDP_AD_ENABLED: u64 = 0 << SPTE_TDP_AD_SHIFT;
pub const SPTE_TDP_AD_DISABLED: u64 = 1 << SPTE_TDP_AD_SHIFT;
pub const SPTE_TDP_AD_WRPROT_ONLY: u64 = 2 << SPTE_TDP_AD_SHIFT;

pub const SPTE_BASE_ADDR_MASK: u64 = genmask(51, PAGE_SHIFT);

/// Bits relocated into the saved-bits field when an entry is marked for
/// access tracking (EPT R and X).
pub const SHADOW_ACC_TRACK_SAVED_BITS_MASK: u64 = 0x5;
pub const SHADOW_ACC_TRACK_SAVED_BITS_SHIFT: u32 = 54;
pub const SHADOW_ACC_TRACK_SAVED_MASK: u64 =
    SHADOW_ACC_TRACK_SAVED_BITS_MASK << SHADOW_ACC_TRACK_SAVED_BITS_SHIFT;

pub const DEFAULT_SPTE_HOST_WRITABLE: u64 = 1 << 9;
pub const DEFAULT_SPTE_MMU_WRITABLE: u64 = 1 << 10;
pub const EPT_SPTE_HOST_WRITABLE: u64 = 1 << 57;
pub const EPT_SPTE_MMU_WRITABLE: u64 = 1 << 58;

pub const MMIO_SPTE_GEN_LOW_START: u32 = 3;
pub const MMIO_SPTE_GEN_LOW_END: u32 = 10;
pub const MMIO_SPTE_GEN_HIGH_START: u32 = 52;
pub const MMIO_SPTE_GEN_HIGH_END: u32 = 62;
pub const MMIO_SPTE_GEN_LOW_MASK: u64 = genmask(MMIO_SPTE_GEN_LOW_END, MMIO_SPTE_GEN_LOW_START);
pub const MMIO_SPTE_GEN_HIGH_MASK: u64 =
    genmask(MMIO_SPTE_GEN_HIGH_END, MMIO_SPTE_GEN_HIGH_START);
pub const MMIO_SPTE_GEN_LOW_BITS: u32 = MMIO_SPTE_GEN_LOW_END - MMIO_SPTE_GEN_LOW_START + 1;
pub const MMIO_SPTE_GEN_HIGH_BITS: u32 = MMIO_SPTE_GEN_HIGH_END - MMIO_SPTE_GEN_HIGH_START + 1;
pub const MMIO_SPTE_GEN_LOW_SHIFT: u32 = MMIO_SPTE_GEN_LOW_START;
pub const MMIO_SPTE_GEN_HIGH_SHIFT: u32 = MMIO_SPTE_GEN_HIGH_START - MMIO_SPTE_GEN_LOW_BITS;
pub const MMIO_SPTE_GEN_MASK: u64 =
    genmask(MMIO_SPTE_GEN_LOW_BITS + MMIO_SPTE_GEN_HIGH_BITS - 1, 0);

/// Bits an MMIO marker mask may use without colliding with the generation.
pub const SPTE_MMIO_ALLOWED_MASK: u64 = (1 << 63) | genmask(51, 12) | genmask(2, 0);

/// Number of high physical-address bits duplicated for the L1TF mitigation.
pub const SHADOW_NONPRESENT_OR_RSVD_MASK_LEN: u32 = 5;

/// Value of a frozen entry: not shadow-present, not MMIO, no RWX bits.
pub const REMOVED_SPTE: u64 = 0x5a0;

/// Set in the memslot generation while an update is in flight.
pub const KVM_MEMSLOT_GEN_UPDATE_IN_PROGRESS: u64 = 1 << 63;

const _: () = assert!(REMOVED_SPTE & SPTE_MMU_PRESENT_MASK == 0);
const _: () = assert!(
    SPTE_MMU_PRESENT_MASK & (MMIO_SPTE_GEN_LOW_MASK | MMIO_SPTE_GEN_HIGH_MASK) == 0
);
const _: () = assert!(SPTE_TDP_AD_MASK & SHADOW_ACC_TRACK_SAVED_MASK == 0);
const _: () = assert!(MMIO_SPTE_GEN_LOW_MASK & MMIO_SPTE_GEN_HIGH_MASK == 0);
const _: () = assert!(
    SPTE_MMIO_ALLOWED_MASK & (MMIO_SPTE_GEN_LOW_MASK | MMIO_SPTE_GEN_HIGH_MASK) == 0
);
const _: () = assert!(MMIO_SPTE_GEN_MASK == (1 << 19) - 1);

/// Which family of masks is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingMode {
    /// Legacy x86 page tables (shadow paging or NPT).
    Legacy,
    /// VMX extended page tables.
    Ept { has_ad_bits: bool, has_exec_only: bool },
}

/// The bit assignments used to build SPTEs in the active paging mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpteMasks {
    pub host_writable_mask: u64,
    pub mmu_writable_mask: u64,
    pub nx_mask: u64,
    pub x_mask: u64,
    pub user_mask: u64,
    pub accessed_mask: u64,
    pub dirty_mask: u64,
    pub mmio_value: u64,
    pub mmio_mask: u64,
    pub mmio_access_mask: u64,
    pub present_mask: u64,
    pub memtype_mask: u64,
    pub me_value: u64,
    pub me_mask: u64,
    pub acc_track_mask: u64,
    /// High physical-address bits set in every non-present entry (L1TF).
    pub nonpresent_or_rsvd_mask: u64,
    /// GFN bits that stay in place in MMIO entries.
    pub nonpresent_or_rsvd_lower_gfn_mask: u64,
    pub phys_bits: u32,
    /// Whether MMIO entries are created at all.
    pub enable_mmio_caching: bool,
    allow_mmio_caching: bool,
    mode: PagingMode,
}

impl SpteMasks {
    /// Selects the legacy paging masks. The L1TF range is derived from the
    /// cache width, and a reserved physical-address bit is used as MMIO
    /// marker unless the CPU has no reserved PA bits.
    pub fn reset_all(cfg: &SpteConfig) -> Self {
        let mut low_phys_bits = cfg.phys_bits;
        let mut nonpresent_or_rsvd_mask = 0;

        if cfg.has_l1tf {
            let too_wide = cfg.cache_bits >= MAX_PHYS_BITS - SHADOW_NONPRESENT_OR_RSVD_MASK_LEN;
            mmu_warn_on!(too_wide, "L1TF cache width {} too large", cfg.cache_bits);
            if !too_wide {
                low_phys_bits = cfg.cache_bits - SHADOW_NONPRESENT_OR_RSVD_MASK_LEN;
                nonpresent_or_rsvd_mask = rsvd_bits(low_phys_bits, cfg.cache_bits - 1);
            }
        }

        let mut masks = Self {
            host_writable_mask: DEFAULT_SPTE_HOST_WRITABLE,
            mmu_writable_mask: DEFAULT_SPTE_MMU_WRITABLE,
            nx_mask: PT64_NX_MASK,
            x_mask: 0,
            user_mask: PT_USER_MASK,
            accessed_mask: PT_ACCESSED_MASK,
            dirty_mask: PT_DIRTY_MASK,
            mmio_value: 0,
            mmio_mask: 0,
            mmio_access_mask: 0,
            present_mask: PT_PRESENT_MASK,
            memtype_mask: 0,
            me_value: 0,
            me_mask: 0,
            acc_track_mask: 0,
            nonpresent_or_rsvd_mask,
            nonpresent_or_rsvd_lower_gfn_mask: genmask(low_phys_bits - 1, PAGE_SHIFT),
            phys_bits: cfg.shadow_phys_bits,
            enable_mmio_caching: cfg.allow_mmio_caching,
            allow_mmio_caching: cfg.allow_mmio_caching,
            mode: PagingMode::Legacy,
        };

        // A reserved PA bit makes MMIO accesses fault with PFEC.RSVD=1. With
        // 52 PA bits there is no reserved bit left to use.
        let mmio_mask = if cfg.shadow_phys_bits < MAX_PHYS_BITS {
            (1 << 51) | PT_PRESENT_MASK
        } else {
            0
        };
        masks.set_mmio_spte_mask(
            mmio_mask,
            mmio_mask,
            (AccessRights::WRITE | AccessRights::USER).as_u64(),
        );
        masks
    }

    /// Switches to EPT masks. Expects the L1TF state of a preceding
    /// [`Self::reset_all()`].
    pub fn set_ept_masks(&mut self, has_ad_bits: bool, has_exec_only: bool) {
        self.user_mask = VMX_EPT_READABLE_MASK;
        self.accessed_mask = if has_ad_bits { VMX_EPT_ACCESS_BIT } else { 0 };
        self.dirty_mask = if has_ad_bits { VMX_EPT_DIRTY_BIT } else { 0 };
        self.nx_mask = 0;
        self.x_mask = VMX_EPT_EXECUTABLE_MASK;
        // Without exec-only support every present entry must be readable.
        self.present_mask = if has_exec_only {
            0
        } else {
            VMX_EPT_READABLE_MASK
        };
        self.memtype_mask = VMX_EPT_MT_MASK | VMX_EPT_IPAT_BIT;
        self.acc_track_mask = VMX_EPT_RWX_MASK;
        self.host_writable_mask = EPT_SPTE_HOST_WRITABLE;
        self.mmu_writable_mask = EPT_SPTE_MMU_WRITABLE;
        self.mode = PagingMode::Ept {
            has_ad_bits,
            has_exec_only,
        };

        // W+X without R is an EPT misconfiguration on every walker.
        self.set_mmio_spte_mask(VMX_EPT_MISCONFIG_WX_VALUE, VMX_EPT_RWX_MASK, 0);
    }

    /// Configures the MMIO marker. Inconsistent settings disable MMIO
    /// caching instead of failing.
    pub fn set_mmio_spte_mask(&mut self, mmio_value: u64, mmio_mask: u64, access_mask: u64) {
        let mut mmio_value = mmio_value;

        if access_mask > u64::from(u32::MAX) {
            log::warn!("MMIO access mask {:#x} wider than 32 bits", access_mask);
            mmio_value = 0;
        }

        if mmio_value & self.nonpresent_or_rsvd_lower_gfn_mask != 0 {
            log::warn!(
                "MMIO value {:#x} overlaps the GFN bits of MMIO SPTEs",
                mmio_value
            );
            mmio_value = 0;
        }

        self.enable_mmio_caching = self.allow_mmio_caching;
        if !self.enable_mmio_caching {
            mmio_value = 0;
        }

        if mmio_mask & !SPTE_MMIO_ALLOWED_MASK != 0 {
            log::warn!("MMIO mask {:#x} uses reserved bits", mmio_mask);
            mmio_value = 0;
        }

        if mmio_value & (self.nonpresent_or_rsvd_mask << SHADOW_NONPRESENT_OR_RSVD_MASK_LEN) != 0 {
            log::warn!(
                "MMIO value {:#x} collides with the relocated L1TF GFN bits",
                mmio_value
            );
            mmio_value = 0;
        }

        if mmio_value & mmio_mask != mmio_value {
            log::warn!(
                "MMIO value {:#x} does not match its mask {:#x}",
                mmio_value,
                mmio_mask
            );
            mmio_value = 0;
        }

        if mmio_value != 0 && REMOVED_SPTE & mmio_mask == mmio_value {
            log::warn!("MMIO value {:#x} matches removed SPTEs", mmio_value);
            mmio_value = 0;
        }

        if mmio_value == 0 {
            self.enable_mmio_caching = false;
        }

        self.mmio_value = mmio_value;
        self.mmio_mask = mmio_mask;
        self.mmio_access_mask = access_mask;
    }

    /// Configures the memory-encryption bits. `me_value` must be a subset of
    /// `me_mask`, otherwise both are cleared.
    pub fn set_me_spte_mask(&mut self, me_value: u64, me_mask: u64) {
        if me_value & !me_mask != 0 {
            log::warn!(
                "ME value {:#x} not covered by ME mask {:#x}",
                me_value,
                me_mask
            );
            self.me_value = 0;
            self.me_mask = 0;
            return;
        }
        self.me_value = me_value;
        self.me_mask = me_mask;
    }

    pub fn mode(&self) -> PagingMode {
        self.mode
    }

    pub fn is_ept(&self) -> bool {
        matches!(self.mode, PagingMode::Ept { .. })
    }

    /// Physical-address bits that cannot appear in an SPTE.
    pub fn reserved_hpa_bits(&self) -> u64 {
        rsvd_bits(self.phys_bits, 63)
    }
}

static SPTE_MASKS: ImmutAfterInitCell<SpteMasks> = ImmutAfterInitCell::uninit();

/// Publishes the mask set used by the hypervisor's MMU. Called once, on the
/// boot CPU.
pub fn spte_masks_init(masks: &SpteMasks) -> ImmutAfterInitResult<()> {
    SPTE_MASKS.init(masks)?;
    log::info!(
        "SPTE masks: {:?} paging, {} physical address bits",
        masks.mode(),
        masks.phys_bits
    );
    Ok(())
}

/// Returns the active mask set. Must only be called after
/// [`spte_masks_init()`].
pub fn spte_masks() -> &'static SpteMasks {
    &SPTE_MASKS
}
