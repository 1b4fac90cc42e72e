// SPDX-License-Identifier: MIT OR Apache-2.0

//! MMIO SPTEs: non-present entries that cache the GFN, access rights and
//! memslot generation of an emulated MMIO region.

use crate::mmu::masks::*;
use crate::mmu::{AccessRights, Gfn, MmuContext};
use crate::types::PAGE_SHIFT;

fn generation_mmio_spte_mask(gen: u64) -> u64 {
    mmu_warn_on!(gen & !MMIO_SPTE_GEN_MASK != 0);

    let mut mask = (gen << MMIO_SPTE_GEN_LOW_SHIFT) & MMIO_SPTE_GEN_LOW_MASK;
    mask |= (gen << MMIO_SPTE_GEN_HIGH_SHIFT) & MMIO_SPTE_GEN_HIGH_MASK;
    mask
}

/// Builds an MMIO SPTE for `gfn` tagged with the VM's current memslot
/// generation.
pub fn make_mmio_spte<C: MmuContext>(
    m: &SpteMasks,
    ctx: &C,
    gfn: Gfn,
    access: AccessRights,
) -> u64 {
    let gen = ctx.memslots_generation() & MMIO_SPTE_GEN_MASK;
    let mmio_value = ctx.shadow_mmio_value();
    let gpa = gfn << PAGE_SHIFT;

    mmu_warn_on!(mmio_value == 0, "MMIO SPTE requested with MMIO caching off");

    let mut spte = generation_mmio_spte_mask(gen);
    spte |= mmio_value | (access.as_u64() & m.mmio_access_mask);
    spte |= gpa | m.nonpresent_or_rsvd_mask;
    // Duplicate the GFN bits that overlap the L1TF range above it.
    spte |= (gpa & m.nonpresent_or_rsvd_mask) << SHADOW_NONPRESENT_OR_RSVD_MASK_LEN;
    spte
}

pub fn get_mmio_spte_generation(spte: u64) -> u64 {
    let mut gen = (spte & MMIO_SPTE_GEN_LOW_MASK) >> MMIO_SPTE_GEN_LOW_SHIFT;
    gen |= (spte & MMIO_SPTE_GEN_HIGH_MASK) >> MMIO_SPTE_GEN_HIGH_SHIFT;
    gen
}

pub fn get_mmio_spte_gfn(m: &SpteMasks, spte: u64) -> Gfn {
    let mut gpa = spte & m.nonpresent_or_rsvd_lower_gfn_mask;
    gpa |= (spte >> SHADOW_NONPRESENT_OR_RSVD_MASK_LEN) & m.nonpresent_or_rsvd_mask;
    gpa >> PAGE_SHIFT
}

pub fn get_mmio_spte_access(m: &SpteMasks, spte: u64) -> AccessRights {
    // The access mask fits 32 bits, checked when it is configured.
    AccessRights::from_bits_truncate((spte & m.mmio_access_mask) as u32)
}

/// Whether the MMIO SPTE was created under memslot generation `gen`. A
/// generation with an update in flight never matches.
pub fn check_mmio_spte(spte: u64, gen: u64) -> bool {
    if gen & KVM_MEMSLOT_GEN_UPDATE_IN_PROGRESS != 0 {
        return false;
    }
    gen & MMIO_SPTE_GEN_MASK == get_mmio_spte_generation(spte)
}
