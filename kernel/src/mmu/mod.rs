// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shadow page-table entry (SPTE) encoding.
//!
//! Everything in here computes 64-bit entry values from a [`SpteMasks`] set
//! describing the active paging mode. Nothing in this module writes into a
//! live page table except the helpers in [`update`], which implement the
//! plain-store versus atomic-exchange rule for entries with volatile bits.

/// Reports a broken MMU construction invariant. Fatal in debug builds and
/// with the `prove-mmu` feature, compiled out otherwise.
macro_rules! mmu_warn_on {
    ($cond:expr) => {
        mmu_warn_on!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if cfg!(any(debug_assertions, feature = "prove-mmu")) && $cond {
            panic!($($arg)+);
        }
    };
}

pub mod make;
pub mod masks;
pub mod memtype;
pub mod mmio;
pub mod rsvd;
pub mod spte;
pub mod update;

pub use make::{make_spte, MadeSpte, SpteRequest};
pub use masks::{spte_masks, SpteMasks};
pub use memtype::PfnInfo;
pub use rsvd::ReservedBits;

use crate::types::PAGE_SHIFT;
use bitflags::bitflags;

/// Guest frame number.
pub type Gfn = u64;
/// Host frame number.
pub type KvmPfn = u64;

bitflags! {
    /// Access rights requested for a mapping. Read access is implied.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct AccessRights: u32 {
        const EXEC  = 1 << 0;
        const WRITE = 1 << 1;
        const USER  = 1 << 2;
        const ALL   = Self::EXEC.bits() | Self::WRITE.bits() | Self::USER.bits();
    }
}

impl AccessRights {
    /// Access bits as stored in MMIO SPTEs.
    pub fn as_u64(self) -> u64 {
        u64::from(self.bits())
    }
}

/// Page-table level of an entry; `L4K` entries map single pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PgLevel {
    L4K = 1,
    L2M = 2,
    L1G = 3,
    L512G = 4,
    L256T = 5,
}

impl PgLevel {
    pub const fn as_index(self) -> usize {
        self as usize - 1
    }

    pub const fn is_huge(self) -> bool {
        !matches!(self, Self::L4K)
    }

    /// Number of 4K pages mapped by one entry at this level.
    pub const fn pages_per_hpage(self) -> u64 {
        1 << ((self as u32 - 1) * 9)
    }

    /// Size in bytes of the region mapped by one entry at this level.
    pub const fn page_size(self) -> u64 {
        self.pages_per_hpage() << PAGE_SHIFT
    }
}

impl TryFrom<u8> for PgLevel {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, u8> {
        match level {
            1 => Ok(Self::L4K),
            2 => Ok(Self::L2M),
            3 => Ok(Self::L1G),
            4 => Ok(Self::L512G),
            5 => Ok(Self::L256T),
            l => Err(l),
        }
    }
}

/// The parts of a shadow page's role that affect entry encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpRole {
    pub level: PgLevel,
    /// Access rights the shadow page was created with.
    pub access: AccessRights,
    /// Accessed/dirty bits are not used; track accesses by clearing RWX.
    pub ad_disabled: bool,
    /// Dirty logging relies on write-protection (nested PML).
    pub ad_need_write_protect: bool,
}

impl SpRole {
    pub const fn new(level: PgLevel) -> Self {
        Self {
            level,
            access: AccessRights::ALL,
            ad_disabled: false,
            ad_need_write_protect: false,
        }
    }
}

/// The unsync step refused to make a guest frame writable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsyncError {
    /// Another component tracks writes to the frame.
    WriteTracked,
    /// Shadow pages map the frame and unsync is not allowed right now.
    NotAllowed,
}

/// Per-VM and per-vCPU services the encoder needs from the surrounding MMU.
pub trait MmuContext {
    /// Whether the VM runs with the NX huge page mitigation.
    fn nx_huge_page_enabled(&self) -> bool;

    /// Host view of a frame, used for MMIO classification.
    fn pfn_info(&self, pfn: KvmPfn) -> PfnInfo;

    /// Memory type bits for a mapping of `gfn` (EPT only).
    fn mt_mask(&self, gfn: Gfn, is_mmio: bool) -> u64;

    /// Marks the shadow pages that map `gfn` unsync so the frame can be
    /// mapped writable.
    fn try_to_unsync_pages(
        &mut self,
        gfn: Gfn,
        can_unsync: bool,
        prefetch: bool,
    ) -> Result<(), UnsyncError>;

    /// Records `gfn` in the dirty bitmap of its memory slot.
    fn mark_page_dirty_in_slot(&mut self, gfn: Gfn);

    /// Reserved bits of the active root, used to validate new entries.
    fn shadow_zero_check(&self) -> &ReservedBits;

    /// Generation of the VM's memory slot set.
    fn memslots_generation(&self) -> u64;

    /// MMIO marker value in use for this VM.
    fn shadow_mmio_value(&self) -> u64;

    fn set_pfn_accessed(&mut self, pfn: KvmPfn);

    fn set_pfn_dirty(&mut self, pfn: KvmPfn);
}
