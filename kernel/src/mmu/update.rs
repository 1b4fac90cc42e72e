// SPDX-License-Identifier: MIT OR Apache-2.0

//! Installing SPTEs into live page tables.
//!
//! Hardware walkers on other CPUs may set A/D bits, and the lockless fast
//! fault path may make a write-protected entry writable. An entry with such
//! volatile bits is replaced with an atomic exchange so no update is lost;
//! all other entries use a plain store.

use crate::mmu::masks::SpteMasks;
use crate::mmu::spte::*;
use crate::mmu::MmuContext;
use core::sync::atomic::{AtomicU64, Ordering};

fn update_clear_spte_fast(sptep: &AtomicU64, spte: u64) {
    sptep.store(spte, Ordering::Relaxed);
}

fn update_clear_spte_slow(sptep: &AtomicU64, spte: u64) -> u64 {
    sptep.swap(spte, Ordering::AcqRel)
}

/// Installs `new_spte` into a slot that holds no present entry.
pub fn mmu_spte_set(sptep: &AtomicU64, new_spte: u64) {
    mmu_warn_on!(is_shadow_present_pte(sptep.load(Ordering::Relaxed)));
    update_clear_spte_fast(sptep, new_spte);
}

/// Replaces the entry in `sptep` without acting on lost A/D state. Returns
/// the previous value, including bits hardware set concurrently.
pub fn mmu_spte_update_no_track(m: &SpteMasks, sptep: &AtomicU64, new_spte: u64) -> u64 {
    let mut old_spte = sptep.load(Ordering::Relaxed);

    mmu_warn_on!(!is_shadow_present_pte(new_spte));
    check_spte_writable_invariants(m, new_spte);

    if !is_shadow_present_pte(old_spte) {
        mmu_spte_set(sptep, new_spte);
        return old_spte;
    }

    if !spte_has_volatile_bits(m, old_spte) {
        update_clear_spte_fast(sptep, new_spte);
    } else {
        old_spte = update_clear_spte_slow(sptep, new_spte);
    }

    mmu_warn_on!(
        spte_to_pfn(old_spte) != spte_to_pfn(new_spte),
        "SPTE update changes pfn {:#x} -> {:#x}",
        spte_to_pfn(old_spte),
        spte_to_pfn(new_spte)
    );

    old_spte
}

/// Replaces a present entry and propagates lost accessed/dirty state to the
/// backing frame. Returns whether TLBs must be flushed.
pub fn mmu_spte_update<C: MmuContext>(
    m: &SpteMasks,
    ctx: &mut C,
    sptep: &AtomicU64,
    new_spte: u64,
) -> bool {
    let old_spte = mmu_spte_update_no_track(m, sptep, new_spte);
    if !is_shadow_present_pte(old_spte) {
        return false;
    }

    let mut flush = false;

    // The fast fault path only makes MMU-writable entries writable, so
    // revoking MMU-writable needs a flush even if the old entry was
    // read-only.
    if is_mmu_writable_spte(m, old_spte) && !is_writable_pte(new_spte) {
        flush = true;
    }

    if is_accessed_spte(m, old_spte) && !is_accessed_spte(m, new_spte) {
        flush = true;
        ctx.set_pfn_accessed(spte_to_pfn(old_spte));
    }

    if is_dirty_spte(m, old_spte) && !is_dirty_spte(m, new_spte) {
        flush = true;
        ctx.set_pfn_dirty(spte_to_pfn(old_spte));
    }

    flush
}

/// Clears the slot and transfers the A/D state of the old entry to its
/// frame. Returns the old entry.
pub fn mmu_spte_clear_track_bits<C: MmuContext>(
    m: &SpteMasks,
    ctx: &mut C,
    sptep: &AtomicU64,
) -> u64 {
    let mut old_spte = sptep.load(Ordering::Relaxed);

    if !is_shadow_present_pte(old_spte) || !spte_has_volatile_bits(m, old_spte) {
        update_clear_spte_fast(sptep, 0);
    } else {
        old_spte = update_clear_spte_slow(sptep, 0);
    }

    if !is_shadow_present_pte(old_spte) {
        return old_spte;
    }

    let pfn = spte_to_pfn(old_spte);
    if is_accessed_spte(m, old_spte) {
        ctx.set_pfn_accessed(pfn);
    }
    if is_dirty_spte(m, old_spte) {
        ctx.set_pfn_dirty(pfn);
    }

    old_spte
}

/// Test-and-clear young. Returns whether the entry had been accessed.
pub fn mmu_spte_age<C: MmuContext>(m: &SpteMasks, ctx: &mut C, sptep: &AtomicU64) -> bool {
    let spte = sptep.load(Ordering::Relaxed);

    if !is_accessed_spte(m, spte) {
        return false;
    }

    if spte_ad_enabled(spte) {
        sptep.fetch_and(!m.accessed_mask, Ordering::AcqRel);
    } else {
        // Access tracking drops W; record dirty state before it is lost.
        if is_writable_pte(spte) {
            ctx.set_pfn_dirty(spte_to_pfn(spte));
        }
        mmu_spte_update_no_track(m, sptep, mark_spte_for_access_track(m, spte));
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::masks::{SPTE_MMU_PRESENT_MASK, SPTE_TDP_AD_DISABLED};
    use crate::testutils::{ept_masks, legacy_masks, FakeMmu};
    use cpuarch::ept::{VMX_EPT_READABLE_MASK, VMX_EPT_RWX_MASK, VMX_EPT_WRITABLE_MASK};
    use cpuarch::paging::{PT_PRESENT_MASK, PT_WRITABLE_MASK};

    const PFN: u64 = 0x42;

    fn present(m: &SpteMasks) -> u64 {
        SPTE_MMU_PRESENT_MASK | m.present_mask | (PFN << 12)
    }

    #[test]
    fn test_set_and_update() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let slot = AtomicU64::new(0);

        let base = present(&m) | m.accessed_mask;
        mmu_spte_set(&slot, base);
        assert_eq!(slot.load(Ordering::Relaxed), base);

        let w = base | PT_WRITABLE_MASK | m.mmu_writable_mask | m.host_writable_mask | m.dirty_mask;
        assert!(!mmu_spte_update(&m, &mut ctx, &slot, w));
        assert_eq!(slot.load(Ordering::Relaxed), w);

        // Write-protecting a dirty entry: flush and mark the frame dirty.
        assert!(mmu_spte_update(&m, &mut ctx, &slot, base | m.host_writable_mask));
        assert_eq!(ctx.dirty_pfns, [PFN]);
        assert!(ctx.accessed_pfns.is_empty());
    }

    #[test]
    fn test_update_from_non_present() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let slot = AtomicU64::new(0);
        assert!(!mmu_spte_update(&m, &mut ctx, &slot, present(&m)));
        assert_eq!(slot.load(Ordering::Relaxed), present(&m));
    }

    #[test]
    fn test_update_clears_accessed() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let slot = AtomicU64::new(present(&m) | m.accessed_mask);
        assert!(mmu_spte_update(&m, &mut ctx, &slot, present(&m)));
        assert_eq!(ctx.accessed_pfns, [PFN]);
    }

    #[test]
    fn test_update_volatile_returns_current() {
        let m = legacy_masks();
        // Not accessed yet: hardware may set A at any time.
        let old = present(&m);
        assert!(spte_has_volatile_bits(&m, old));
        let slot = AtomicU64::new(old);
        let new = old | m.user_mask;
        assert_eq!(mmu_spte_update_no_track(&m, &slot, new), old);
        assert_eq!(slot.load(Ordering::Relaxed), new);
    }

    #[test]
    fn test_clear_track_bits() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let spte = present(&m)
            | m.accessed_mask
            | m.dirty_mask
            | PT_WRITABLE_MASK
            | m.mmu_writable_mask
            | m.host_writable_mask;
        let slot = AtomicU64::new(spte);
        assert_eq!(mmu_spte_clear_track_bits(&m, &mut ctx, &slot), spte);
        assert_eq!(slot.load(Ordering::Relaxed), 0);
        assert_eq!(ctx.accessed_pfns, [PFN]);
        assert_eq!(ctx.dirty_pfns, [PFN]);

        assert_eq!(mmu_spte_clear_track_bits(&m, &mut ctx, &slot), 0);
        assert_eq!(ctx.accessed_pfns.len(), 1);
    }

    #[test]
    fn test_age_ad_enabled() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let slot = AtomicU64::new(present(&m) | m.accessed_mask);
        assert!(mmu_spte_age(&m, &mut ctx, &slot));
        assert_eq!(slot.load(Ordering::Relaxed), present(&m));
        assert!(!mmu_spte_age(&m, &mut ctx, &slot));
    }

    #[test]
    fn test_age_access_track() {
        let m = ept_masks(false, false);
        let mut ctx = FakeMmu::new(&m);
        let spte = SPTE_MMU_PRESENT_MASK
            | SPTE_TDP_AD_DISABLED
            | VMX_EPT_READABLE_MASK
            | VMX_EPT_WRITABLE_MASK
            | m.mmu_writable_mask
            | m.host_writable_mask
            | (PFN << 12);
        let slot = AtomicU64::new(spte);
        assert!(mmu_spte_age(&m, &mut ctx, &slot));
        assert_eq!(ctx.dirty_pfns, [PFN]);

        let aged = slot.load(Ordering::Relaxed);
        assert_eq!(aged & VMX_EPT_RWX_MASK, 0);
        assert!(is_access_track_spte(&m, aged));
        assert!(!mmu_spte_age(&m, &mut ctx, &slot));
    }

    #[test]
    #[should_panic]
    fn test_set_over_present_asserts() {
        let m = legacy_masks();
        let slot = AtomicU64::new(SPTE_MMU_PRESENT_MASK | PT_PRESENT_MASK);
        mmu_spte_set(&slot, present(&m));
    }
}
