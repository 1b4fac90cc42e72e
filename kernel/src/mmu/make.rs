// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::address::{Address, PhysAddr};
use crate::mmu::masks::*;
use crate::mmu::memtype::kvm_is_mmio_pfn;
use crate::mmu::spte::*;
use crate::mmu::{AccessRights, Gfn, KvmPfn, MmuContext, PgLevel, SpRole};
use crate::types::PAGE_SHIFT;
use cpuarch::paging::{PT_PAGE_SIZE_MASK, PT_WRITABLE_MASK};

/// A leaf mapping to encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpteRequest {
    /// Role of the shadow page the entry goes into.
    pub role: SpRole,
    pub access: AccessRights,
    pub gfn: Gfn,
    pub pfn: KvmPfn,
    /// Previous value of the slot.
    pub old_spte: u64,
    /// Speculative fill, not caused by a guest access.
    pub prefetch: bool,
    pub can_unsync: bool,
    /// The host mapping of the frame is writable.
    pub host_writable: bool,
    /// The memslot has dirty logging enabled.
    pub slot_dirty_tracking: bool,
}

impl SpteRequest {
    pub fn new(role: SpRole, access: AccessRights, gfn: Gfn, pfn: KvmPfn) -> Self {
        Self {
            role,
            access,
            gfn,
            pfn,
            old_spte: 0,
            prefetch: false,
            can_unsync: true,
            host_writable: true,
            slot_dirty_tracking: false,
        }
    }
}

/// Result of [`make_spte()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MadeSpte {
    pub spte: u64,
    /// Write access was requested but the frame had to be write-protected.
    /// The caller must flush TLBs if the old entry was writable.
    pub write_protected: bool,
}

/// Computes the leaf SPTE for `req`. Nothing is written to a page table;
/// the caller installs the value, atomically if the old entry has volatile
/// bits.
pub fn make_spte<C: MmuContext>(m: &SpteMasks, ctx: &mut C, req: &SpteRequest) -> MadeSpte {
    let level = req.role.level;
    let mut access = req.access;
    let mut spte = SPTE_MMU_PRESENT_MASK;
    let mut write_protected = false;

    mmu_warn_on!(access.is_empty() && m.present_mask == 0);

    if req.role.ad_disabled {
        spte |= SPTE_TDP_AD_DISABLED;
    } else if req.role.ad_need_write_protect {
        spte |= SPTE_TDP_AD_WRPROT_ONLY;
    }

    spte |= m.present_mask;
    if !req.prefetch && spte_ad_enabled(spte) {
        spte |= m.accessed_mask;
    }

    // Executable huge pages are split before they are mapped executable.
    if level.is_huge() && access.contains(AccessRights::EXEC) && ctx.nx_huge_page_enabled() {
        access.remove(AccessRights::EXEC);
    }

    if access.contains(AccessRights::EXEC) {
        spte |= m.x_mask;
    } else {
        spte |= m.nx_mask;
    }

    if access.contains(AccessRights::USER) {
        spte |= m.user_mask;
    }

    if level.is_huge() {
        spte |= PT_PAGE_SIZE_MASK;
    }

    let is_mmio = kvm_is_mmio_pfn(&ctx.pfn_info(req.pfn));

    if m.memtype_mask != 0 {
        spte |= ctx.mt_mask(req.gfn, is_mmio);
    }

    if req.host_writable {
        spte |= m.host_writable_mask;
    } else {
        access.remove(AccessRights::WRITE);
    }

    if m.me_value != 0 && !is_mmio {
        spte |= m.me_value;
    }

    spte |= req.pfn << PAGE_SHIFT;

    if access.contains(AccessRights::WRITE) {
        spte |= PT_WRITABLE_MASK | m.mmu_writable_mask;

        // Already writable: the frame was unsynced and accounted when the
        // old entry was made.
        if !is_writable_pte(req.old_spte) {
            if let Err(e) = ctx.try_to_unsync_pages(req.gfn, req.can_unsync, req.prefetch) {
                log::debug!("gfn {:#x} write-protected: {:?}", req.gfn, e);
                write_protected = true;
                access.remove(AccessRights::WRITE);
                spte &= !(PT_WRITABLE_MASK | m.mmu_writable_mask);
            }
        }
    }

    if access.contains(AccessRights::WRITE) && spte_ad_enabled(spte) {
        spte |= m.dirty_mask;
    }

    if req.prefetch {
        spte = mark_spte_for_access_track(m, spte);
    }

    mmu_warn_on!(
        ctx.shadow_zero_check().is_rsvd_spte(spte, level),
        "SPTE {:#x} sets reserved bits at level {:?}",
        spte,
        level
    );

    if is_writable_pte(spte) && req.slot_dirty_tracking {
        // Dirty-logged slots are mapped at 4K only.
        mmu_warn_on!(level > PgLevel::L4K);
        ctx.mark_page_dirty_in_slot(req.gfn);
    }

    MadeSpte {
        spte,
        write_protected,
    }
}

pub fn make_spte_executable(m: &SpteMasks, spte: u64) -> u64 {
    let is_access_track = is_access_track_spte(m, spte);
    let mut spte = spte;

    if is_access_track {
        spte = restore_acc_track_spte(m, spte);
    }

    spte &= !m.nx_mask;
    spte |= m.x_mask;

    if is_access_track {
        spte = mark_spte_for_access_track(m, spte);
    }
    spte
}

/// Builds the `index`-th child of `huge_spte` for a page table at
/// `role.level`. Returns 0 if `huge_spte` is not a present huge entry.
pub fn make_huge_page_split_spte(
    m: &SpteMasks,
    huge_spte: u64,
    role: SpRole,
    index: u64,
    nx_huge_page_enabled: bool,
) -> u64 {
    if !is_shadow_present_pte(huge_spte) || !is_large_pte(huge_spte) {
        mmu_warn_on!(true, "splitting non-huge SPTE {:#x}", huge_spte);
        return 0;
    }

    let mut child_spte = huge_spte | ((index * role.level.pages_per_hpage()) << PAGE_SHIFT);

    if role.level == PgLevel::L4K {
        child_spte &= !PT_PAGE_SIZE_MASK;

        // The huge page lost EXEC to the NX huge page mitigation; 4K
        // children get it back if the role allows it.
        if role.access.contains(AccessRights::EXEC) && nx_huge_page_enabled {
            child_spte = make_spte_executable(m, child_spte);
        }
    }

    child_spte
}

/// Non-leaf entry pointing at the page table at `child_pt`.
pub fn make_nonleaf_spte(m: &SpteMasks, child_pt: PhysAddr, ad_disabled: bool) -> u64 {
    let mut spte = SPTE_MMU_PRESENT_MASK;

    spte |= child_pt.bits()
        | m.present_mask
        | PT_WRITABLE_MASK
        | m.user_mask
        | m.x_mask
        | m.me_value;

    if ad_disabled {
        spte |= SPTE_TDP_AD_DISABLED;
    } else {
        spte |= m.accessed_mask;
    }

    spte
}

/// Points `old_spte` at `new_pfn` after the host changed the backing page.
/// The new entry is read-only and must be accessed before it counts as
/// young.
pub fn changed_pte_notifier_make_spte(m: &SpteMasks, old_spte: u64, new_pfn: KvmPfn) -> u64 {
    let mut new_spte = old_spte & !SPTE_BASE_ADDR_MASK;
    new_spte |= new_pfn << PAGE_SHIFT;

    new_spte &= !PT_WRITABLE_MASK;
    new_spte &= !m.host_writable_mask;
    new_spte &= !m.mmu_writable_mask;

    mark_spte_for_access_track(m, new_spte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::UnsyncError;
    use crate::testutils::{ept_masks, legacy_masks, FakeMmu, XorShift};
    use cpuarch::ept::{VMX_EPT_IPAT_BIT, VMX_EPT_MT_MASK, VMX_EPT_READABLE_MASK, VMX_EPT_RWX_MASK};
    use cpuarch::paging::PT_PRESENT_MASK;

    fn req(level: PgLevel, access: AccessRights, pfn: KvmPfn) -> SpteRequest {
        SpteRequest::new(SpRole::new(level), access, 0x100, pfn)
    }

    #[test]
    fn test_read_only_4k() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let made = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::empty(), 0x4567));

        assert!(!made.write_protected);
        assert!(is_shadow_present_pte(made.spte));
        assert_ne!(made.spte & PT_PRESENT_MASK, 0);
        assert!(!is_writable_pte(made.spte));
        assert_eq!(spte_to_pfn(made.spte), 0x4567);
        assert!(!is_dirty_spte(&m, made.spte));
        assert!(is_accessed_spte(&m, made.spte));
        assert!(!is_executable_pte(&m, made.spte));
        assert!(ctx.unsync_calls.is_empty());
        assert!(ctx.dirty_gfns.is_empty());
    }

    #[test]
    fn test_writable_dirty() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let made = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::WRITE, 0x10));

        assert!(!made.write_protected);
        assert!(is_writable_pte(made.spte));
        assert!(is_mmu_writable_spte(&m, made.spte));
        assert!(is_dirty_spte(&m, made.spte));
        assert_eq!(ctx.unsync_calls, [(0x100, true, false)]);
    }

    #[test]
    fn test_write_protect_on_unsync_failure() {
        let m = legacy_masks();
        for err in [UnsyncError::WriteTracked, UnsyncError::NotAllowed] {
            let mut ctx = FakeMmu::new(&m);
            ctx.unsync_result = Err(err);
            let mut r = req(PgLevel::L4K, AccessRights::WRITE | AccessRights::USER, 0x10);
            r.slot_dirty_tracking = true;
            let made = make_spte(&m, &mut ctx, &r);

            assert!(made.write_protected);
            assert!(!is_writable_pte(made.spte));
            assert!(!is_mmu_writable_spte(&m, made.spte));
            assert!(!is_dirty_spte(&m, made.spte));
            // Host-writable stays: the entry may be made writable later.
            assert_ne!(made.spte & m.host_writable_mask, 0);
            assert!(ctx.dirty_gfns.is_empty());
        }
    }

    #[test]
    fn test_old_writable_skips_unsync() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        ctx.unsync_result = Err(UnsyncError::WriteTracked);
        let mut r = req(PgLevel::L4K, AccessRights::WRITE, 0x10);
        r.old_spte = PT_WRITABLE_MASK | PT_PRESENT_MASK | SPTE_MMU_PRESENT_MASK;
        let made = make_spte(&m, &mut ctx, &r);

        assert!(!made.write_protected);
        assert!(is_writable_pte(made.spte));
        // Write stays granted, so the entry is still marked dirty.
        assert_ne!(made.spte & m.dirty_mask, 0);
        assert!(is_dirty_spte(&m, made.spte));
        assert!(ctx.unsync_calls.is_empty());

        let m = ept_masks(true, false);
        let mut ctx = FakeMmu::new(&m);
        let mut r = req(PgLevel::L4K, AccessRights::WRITE | AccessRights::USER, 0x10);
        r.old_spte = PT_WRITABLE_MASK | SPTE_MMU_PRESENT_MASK;
        let made = make_spte(&m, &mut ctx, &r);
        assert_ne!(made.spte & m.dirty_mask, 0);
        assert!(ctx.unsync_calls.is_empty());
    }

    #[test]
    fn test_host_not_writable() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let mut r = req(PgLevel::L4K, AccessRights::WRITE, 0x10);
        r.host_writable = false;
        let made = make_spte(&m, &mut ctx, &r);

        assert!(!made.write_protected);
        assert!(!is_writable_pte(made.spte));
        assert_eq!(made.spte & m.host_writable_mask, 0);
        assert!(ctx.unsync_calls.is_empty());
    }

    #[test]
    fn test_nx_huge_pages() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        ctx.nx_huge_pages = true;

        let huge = make_spte(&m, &mut ctx, &req(PgLevel::L2M, AccessRights::EXEC, 0x200));
        assert!(!is_executable_pte(&m, huge.spte));
        assert!(is_large_pte(huge.spte));

        let small = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::EXEC, 0x200));
        assert!(is_executable_pte(&m, small.spte));

        ctx.nx_huge_pages = false;
        let huge = make_spte(&m, &mut ctx, &req(PgLevel::L2M, AccessRights::EXEC, 0x200));
        assert!(is_executable_pte(&m, huge.spte));
    }

    #[test]
    fn test_nx_huge_pages_ept() {
        let m = ept_masks(true, true);
        let mut ctx = FakeMmu::new(&m);
        ctx.nx_huge_pages = true;

        let access = AccessRights::EXEC | AccessRights::USER;
        let huge = make_spte(&m, &mut ctx, &req(PgLevel::L1G, access, 0x4_0000));
        assert!(!is_executable_pte(&m, huge.spte));
        let small = make_spte(&m, &mut ctx, &req(PgLevel::L4K, access, 0x4_0000));
        assert!(is_executable_pte(&m, small.spte));
    }

    #[test]
    fn test_prefetch_not_accessed() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let mut r = req(PgLevel::L4K, AccessRights::USER, 0x10);
        r.prefetch = true;
        let made = make_spte(&m, &mut ctx, &r);
        assert!(!is_accessed_spte(&m, made.spte));

        let m = ept_masks(false, false);
        let mut ctx = FakeMmu::new(&m);
        r.role.ad_disabled = true;
        let made = make_spte(&m, &mut ctx, &r);
        assert!(is_access_track_spte(&m, made.spte));
        assert_eq!(made.spte & VMX_EPT_RWX_MASK, 0);
        assert_eq!(
            restore_acc_track_spte(&m, made.spte) & VMX_EPT_RWX_MASK,
            VMX_EPT_READABLE_MASK
        );
    }

    #[test]
    fn test_ad_wrprot_only() {
        let m = ept_masks(true, false);
        let mut ctx = FakeMmu::new(&m);
        let mut r = req(PgLevel::L4K, AccessRights::USER, 0x10);
        r.role.ad_need_write_protect = true;
        let made = make_spte(&m, &mut ctx, &r);
        assert_eq!(made.spte & SPTE_TDP_AD_MASK, SPTE_TDP_AD_WRPROT_ONLY);
        assert!(spte_ad_need_write_protect(made.spte));
        assert!(is_accessed_spte(&m, made.spte));
    }

    #[test]
    fn test_memtype() {
        let m = ept_masks(true, false);
        let mut ctx = FakeMmu::new(&m);
        let made = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::USER, 0x10));
        assert_eq!(
            made.spte & (VMX_EPT_MT_MASK | VMX_EPT_IPAT_BIT),
            (6 << 3) | VMX_EPT_IPAT_BIT
        );

        ctx.mmio_pfns = true;
        let made = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::USER, 0x10));
        assert_eq!(made.spte & (VMX_EPT_MT_MASK | VMX_EPT_IPAT_BIT), 0);
    }

    #[test]
    fn test_me_value() {
        let mut m = legacy_masks();
        m.set_me_spte_mask(1 << 45, 1 << 45);
        let mut ctx = FakeMmu::new(&m);
        let made = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::USER, 0x10));
        assert_ne!(made.spte & (1 << 45), 0);

        ctx.mmio_pfns = true;
        let made = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::USER, 0x10));
        assert_eq!(made.spte & (1 << 45), 0);
    }

    #[test]
    fn test_dirty_tracking_marks_4k_only() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);

        // Writable and tracked.
        let mut r = req(PgLevel::L4K, AccessRights::WRITE, 0x10);
        r.slot_dirty_tracking = true;
        make_spte(&m, &mut ctx, &r);
        assert_eq!(ctx.dirty_gfns, [0x100]);

        // Tracked but read-only.
        r.access = AccessRights::USER;
        make_spte(&m, &mut ctx, &r);
        assert_eq!(ctx.dirty_gfns.len(), 1);

        // Writable but not tracked.
        r.access = AccessRights::WRITE;
        r.slot_dirty_tracking = false;
        make_spte(&m, &mut ctx, &r);
        assert_eq!(ctx.dirty_gfns.len(), 1);

        // Writable huge page without tracking.
        let r = req(PgLevel::L2M, AccessRights::WRITE, 0x200);
        make_spte(&m, &mut ctx, &r);
        assert_eq!(ctx.dirty_gfns.len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_dirty_tracking_huge_page_asserts() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let mut r = req(PgLevel::L2M, AccessRights::WRITE, 0x200);
        r.slot_dirty_tracking = true;
        make_spte(&m, &mut ctx, &r);
    }

    fn random_request(rng: &mut XorShift, m: &SpteMasks, phys_bits: u32) -> SpteRequest {
        let levels = [PgLevel::L4K, PgLevel::L2M, PgLevel::L1G];
        let level = levels[rng.below(levels.len() as u64) as usize];

        let mut access = AccessRights::from_bits_truncate(rng.next_u64() as u32);
        if m.is_ept() {
            // EPT cannot express write without read.
            if access.contains(AccessRights::WRITE) {
                access |= AccessRights::USER;
            }
            if access.is_empty() && m.present_mask == 0 {
                access = AccessRights::EXEC;
            }
        }

        let max_pfn = 1u64 << (phys_bits - PAGE_SHIFT);
        let pfn = rng.below(max_pfn) & !(level.pages_per_hpage() - 1);

        let mut role = SpRole::new(level);
        role.ad_disabled = m.accessed_mask == 0 || rng.below(4) == 0;
        role.ad_need_write_protect = rng.below(4) == 0;

        SpteRequest {
            role,
            access,
            gfn: rng.below(1 << 36),
            pfn,
            old_spte: if rng.below(2) == 0 { 0 } else { PT_WRITABLE_MASK },
            prefetch: rng.below(2) == 0,
            can_unsync: rng.below(2) == 0,
            host_writable: rng.below(4) != 0,
            slot_dirty_tracking: level == PgLevel::L4K && rng.below(2) == 0,
        }
    }

    #[test]
    fn test_no_reserved_bits() {
        let modes = [
            legacy_masks(),
            ept_masks(true, true),
            ept_masks(true, false),
            ept_masks(false, true),
            ept_masks(false, false),
        ];
        let mut rng = XorShift::new(0x5eed);

        for m in modes.iter() {
            let mut ctx = FakeMmu::new(m);
            for i in 0..2000 {
                let r = random_request(&mut rng, m, m.phys_bits);
                ctx.nx_huge_pages = i % 3 == 0;
                ctx.mmio_pfns = i % 5 == 0;
                ctx.unsync_result = if i % 7 == 0 {
                    Err(UnsyncError::NotAllowed)
                } else {
                    Ok(())
                };
                let made = make_spte(m, &mut ctx, &r);
                let level = r.role.level;
                assert!(
                    !ctx.rsvd.is_rsvd_spte(made.spte, level),
                    "{:?} {:?} -> {:#x}",
                    m.mode(),
                    r,
                    made.spte
                );
                assert!(is_shadow_present_pte(made.spte));
                assert!(!is_mmio_spte(m, made.spte));
                assert_eq!(spte_to_pfn(made.spte), r.pfn);
                check_spte_writable_invariants(m, made.spte);
            }
        }
    }

    #[test]
    fn test_make_spte_executable() {
        let m = ept_masks(false, true);
        let spte = SPTE_MMU_PRESENT_MASK | SPTE_TDP_AD_DISABLED | VMX_EPT_READABLE_MASK;
        let tracked = mark_spte_for_access_track(&m, spte);
        let exec = make_spte_executable(&m, tracked);
        assert!(is_access_track_spte(&m, exec));
        assert!(is_executable_pte(&m, restore_acc_track_spte(&m, exec)));

        let m = legacy_masks();
        let spte = SPTE_MMU_PRESENT_MASK | PT_PRESENT_MASK | m.nx_mask;
        assert_eq!(
            make_spte_executable(&m, spte),
            SPTE_MMU_PRESENT_MASK | PT_PRESENT_MASK
        );
    }

    #[test]
    fn test_huge_page_split() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        ctx.nx_huge_pages = true;
        let huge = make_spte(
            &m,
            &mut ctx,
            &req(PgLevel::L2M, AccessRights::EXEC | AccessRights::USER, 0x400),
        )
        .spte;
        assert!(!is_executable_pte(&m, huge));

        let role = SpRole::new(PgLevel::L4K);
        for index in [0, 1, 511] {
            let child = make_huge_page_split_spte(&m, huge, role, index, true);
            assert_eq!(spte_to_pfn(child), 0x400 + index);
            assert!(!is_large_pte(child));
            assert!(is_executable_pte(&m, child));
        }

        let child = make_huge_page_split_spte(&m, huge, role, 3, false);
        assert!(!is_executable_pte(&m, child));

        // 1G split into 2M children keeps the page-size bit.
        let huge = make_spte(
            &m,
            &mut ctx,
            &req(PgLevel::L1G, AccessRights::USER, 0x4_0000),
        )
        .spte;
        let child = make_huge_page_split_spte(&m, huge, SpRole::new(PgLevel::L2M), 2, true);
        assert!(is_large_pte(child));
        assert_eq!(spte_to_pfn(child), 0x4_0000 + 2 * 512);
    }

    #[test]
    fn test_nonleaf_spte() {
        let m = legacy_masks();
        let spte = make_nonleaf_spte(&m, PhysAddr::new(0x7000), false);
        assert!(is_shadow_present_pte(spte));
        assert!(is_writable_pte(spte));
        assert_eq!(spte_to_pfn(spte), 7);
        assert_ne!(spte & m.accessed_mask, 0);

        let m = ept_masks(false, true);
        let spte = make_nonleaf_spte(&m, PhysAddr::new(0x7000), true);
        assert!(!spte_ad_enabled(spte));
        assert!(is_executable_pte(&m, spte));
    }

    #[test]
    fn test_changed_pte_notifier() {
        let m = legacy_masks();
        let mut ctx = FakeMmu::new(&m);
        let old = make_spte(&m, &mut ctx, &req(PgLevel::L4K, AccessRights::WRITE, 0x10)).spte;
        let new = changed_pte_notifier_make_spte(&m, old, 0x20);
        assert_eq!(spte_to_pfn(new), 0x20);
        assert!(!is_writable_pte(new));
        assert!(!is_mmu_writable_spte(&m, new));
        assert_eq!(new & m.host_writable_mask, 0);
        assert!(!is_accessed_spte(&m, new));
    }
}
