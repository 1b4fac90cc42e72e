// SPDX-License-Identifier: MIT OR Apache-2.0

//! Predicates over SPTE values and the access-tracking transform.

use crate::mmu::masks::*;
use crate::mmu::{KvmPfn, PgLevel};
use crate::types::PAGE_SHIFT;
use cpuarch::paging::{PT_PAGE_SIZE_MASK, PT_WRITABLE_MASK};

pub fn is_removed_spte(spte: u64) -> bool {
    spte == REMOVED_SPTE
}

pub fn is_mmio_spte(m: &SpteMasks, spte: u64) -> bool {
    m.enable_mmio_caching && spte & m.mmio_mask == m.mmio_value
}

pub fn is_shadow_present_pte(spte: u64) -> bool {
    spte & SPTE_MMU_PRESENT_MASK != 0
}

pub fn spte_ad_enabled(spte: u64) -> bool {
    spte & SPTE_TDP_AD_MASK != SPTE_TDP_AD_DISABLED
}

pub fn spte_ad_need_write_protect(spte: u64) -> bool {
    spte & SPTE_TDP_AD_MASK != SPTE_TDP_AD_ENABLED
}

fn spte_shadow_accessed_mask(m: &SpteMasks, spte: u64) -> u64 {
    if spte_ad_enabled(spte) {
        m.accessed_mask
    } else {
        0
    }
}

fn spte_shadow_dirty_mask(m: &SpteMasks, spte: u64) -> u64 {
    if spte_ad_enabled(spte) {
        m.dirty_mask
    } else {
        0
    }
}

pub fn is_access_track_spte(m: &SpteMasks, spte: u64) -> bool {
    !spte_ad_enabled(spte) && spte & m.acc_track_mask == 0
}

pub fn is_large_pte(spte: u64) -> bool {
    spte & PT_PAGE_SIZE_MASK != 0
}

pub fn is_last_spte(spte: u64, level: PgLevel) -> bool {
    level == PgLevel::L4K || is_large_pte(spte)
}

pub fn is_executable_pte(m: &SpteMasks, spte: u64) -> bool {
    spte & (m.x_mask | m.nx_mask) == m.x_mask
}

pub fn spte_to_pfn(spte: u64) -> KvmPfn {
    (spte & SPTE_BASE_ADDR_MASK) >> PAGE_SHIFT
}

pub fn is_accessed_spte(m: &SpteMasks, spte: u64) -> bool {
    let accessed_mask = spte_shadow_accessed_mask(m, spte);
    if accessed_mask != 0 {
        spte & accessed_mask != 0
    } else {
        !is_access_track_spte(m, spte)
    }
}

pub fn is_dirty_spte(m: &SpteMasks, spte: u64) -> bool {
    let dirty_mask = spte_shadow_dirty_mask(m, spte);
    if dirty_mask != 0 {
        spte & dirty_mask != 0
    } else {
        spte & PT_WRITABLE_MASK != 0
    }
}

pub fn is_writable_pte(spte: u64) -> bool {
    spte & PT_WRITABLE_MASK != 0
}

pub fn is_mmu_writable_spte(m: &SpteMasks, spte: u64) -> bool {
    spte & m.mmu_writable_mask != 0
}

/// An MMU-writable entry must be host-writable, and a writable entry must be
/// MMU-writable.
pub fn check_spte_writable_invariants(m: &SpteMasks, spte: u64) {
    if is_mmu_writable_spte(m, spte) {
        mmu_warn_on!(
            spte & m.host_writable_mask == 0,
            "MMU-writable SPTE {:#x} is not host-writable",
            spte
        );
    } else {
        mmu_warn_on!(
            is_writable_pte(spte),
            "writable SPTE {:#x} is not MMU-writable",
            spte
        );
    }
}

/// Whether bits of `spte` can change under the MMU's feet, either set by
/// hardware (A/D) or by lockless fast-path fault handling.
pub fn spte_has_volatile_bits(m: &SpteMasks, spte: u64) -> bool {
    // Write-protected for dirty logging or access tracking: the fast page
    // fault path may make it writable without holding the MMU lock.
    if !is_writable_pte(spte) && is_mmu_writable_spte(m, spte) {
        return true;
    }

    if is_access_track_spte(m, spte) {
        return true;
    }

    if spte_ad_enabled(spte)
        && (spte & m.accessed_mask == 0 || (is_writable_pte(spte) && spte & m.dirty_mask == 0))
    {
        return true;
    }

    false
}

/// Makes the next access to the mapping observable: clears the accessed bit
/// when A/D bits are in use, otherwise moves R/X into the saved-bits field
/// and clears the access-track mask so the entry faults.
pub fn mark_spte_for_access_track(m: &SpteMasks, spte: u64) -> u64 {
    if spte_ad_enabled(spte) {
        return spte & !m.accessed_mask;
    }

    if is_access_track_spte(m, spte) {
        return spte;
    }

    check_spte_writable_invariants(m, spte);

    mmu_warn_on!(
        spte & SHADOW_ACC_TRACK_SAVED_MASK != 0,
        "access tracking saved bits of {:#x} are not zero",
        spte
    );

    let saved = (spte & SHADOW_ACC_TRACK_SAVED_BITS_MASK) << SHADOW_ACC_TRACK_SAVED_BITS_SHIFT;
    (spte | saved) & !m.acc_track_mask
}

/// Undoes [`mark_spte_for_access_track()`] for an entry without A/D bits.
pub fn restore_acc_track_spte(m: &SpteMasks, spte: u64) -> u64 {
    mmu_warn_on!(spte_ad_enabled(spte));
    mmu_warn_on!(!is_access_track_spte(m, spte));

    let saved_bits =
        (spte >> SHADOW_ACC_TRACK_SAVED_BITS_SHIFT) & SHADOW_ACC_TRACK_SAVED_BITS_MASK;

    let mut new_spte = spte & !m.acc_track_mask;
    new_spte &= !SHADOW_ACC_TRACK_SAVED_MASK;
    new_spte | saved_bits
}
