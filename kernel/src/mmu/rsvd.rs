// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::mmu::PgLevel;
use crate::utils::{repeat_byte, rsvd_bits};

const MAX_LEVELS: usize = 5;

/// Reserved-bit masks of a page-table format, indexed by the PS bit (7) of
/// the entry and its level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReservedBits {
    pub rsvd_bits_mask: [[u64; MAX_LEVELS]; 2],
    /// One bit per value of bits 0..5 of an EPT entry; a set bit marks an
    /// illegal memory-type/XWR combination.
    pub bad_mt_xwr: u64,
}

/// Parameters of the legacy 64-bit page-table format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyRsvdParams {
    pub phys_bits: u32,
    /// `L512G` for 4-level paging, `L256T` for 5-level paging.
    pub root_level: PgLevel,
    pub nx: bool,
    pub gbpages: bool,
    /// AMD reserves bit 8 in non-leaf entries.
    pub amd: bool,
}

impl ReservedBits {
    pub fn legacy(p: &LegacyRsvdParams) -> Self {
        let high_bits_rsvd = rsvd_bits(p.phys_bits, 51);
        let nonleaf_bit8_rsvd = if p.amd { rsvd_bits(8, 8) } else { 0 };
        let exb_bit_rsvd = if p.nx { 0 } else { rsvd_bits(63, 63) };
        let gbpages_bit_rsvd = if p.gbpages { 0 } else { rsvd_bits(7, 7) };

        let mut m = [[0u64; MAX_LEVELS]; 2];
        let nonleaf = exb_bit_rsvd | nonleaf_bit8_rsvd | rsvd_bits(7, 7) | high_bits_rsvd;
        if p.root_level == PgLevel::L256T {
            m[0][4] = nonleaf;
            m[1][4] = nonleaf;
        }
        m[0][3] = nonleaf;
        m[0][2] = exb_bit_rsvd | gbpages_bit_rsvd | high_bits_rsvd;
        m[0][1] = exb_bit_rsvd | high_bits_rsvd;
        m[0][0] = exb_bit_rsvd | high_bits_rsvd;
        m[1][3] = m[0][3];
        m[1][2] = exb_bit_rsvd | gbpages_bit_rsvd | high_bits_rsvd | rsvd_bits(13, 29);
        m[1][1] = exb_bit_rsvd | high_bits_rsvd | rsvd_bits(13, 20);
        m[1][0] = m[0][0];

        Self {
            rsvd_bits_mask: m,
            bad_mt_xwr: 0,
        }
    }

    /// EPT reserved bits. `huge_page_level` is the largest level that may
    /// map a page directly.
    pub fn ept(phys_bits: u32, execonly: bool, huge_page_level: PgLevel) -> Self {
        let reserved = rsvd_bits(phys_bits, 51);
        let large_1g_rsvd = if huge_page_level < PgLevel::L1G {
            rsvd_bits(7, 7)
        } else {
            0
        };
        let large_2m_rsvd = if huge_page_level < PgLevel::L2M {
            rsvd_bits(7, 7)
        } else {
            0
        };

        let mut m = [[0u64; MAX_LEVELS]; 2];
        m[0][4] = reserved | rsvd_bits(3, 7);
        m[0][3] = reserved | rsvd_bits(3, 7);
        m[0][2] = reserved | rsvd_bits(3, 6) | large_1g_rsvd;
        m[0][1] = reserved | rsvd_bits(3, 6) | large_2m_rsvd;
        m[0][0] = reserved;

        m[1][4] = m[0][4];
        m[1][3] = m[0][3];
        m[1][2] = reserved | rsvd_bits(12, 29) | large_1g_rsvd;
        m[1][1] = reserved | rsvd_bits(12, 20) | large_2m_rsvd;
        m[1][0] = m[0][0];

        // Memory types 2, 3 and 7 are reserved.
        let mut bad_mt_xwr = 0xFFu64 << (2 * 8);
        bad_mt_xwr |= 0xFFu64 << (3 * 8);
        bad_mt_xwr |= 0xFFu64 << (7 * 8);
        // Write without read: XWR 010 and 110.
        bad_mt_xwr |= repeat_byte(1 << 2);
        bad_mt_xwr |= repeat_byte(1 << 6);
        if !execonly {
            // Execute without read: XWR 100.
            bad_mt_xwr |= repeat_byte(1 << 4);
        }

        Self {
            rsvd_bits_mask: m,
            bad_mt_xwr,
        }
    }

    /// Marks the memory-encryption mask reserved in every level, except for
    /// the bits of the encryption value the MMU itself sets.
    pub fn apply_me_mask(&mut self, me_value: u64, me_mask: u64) {
        if me_mask == 0 {
            return;
        }
        for row in self.rsvd_bits_mask.iter_mut() {
            for mask in row.iter_mut() {
                *mask |= me_mask;
                *mask &= !me_value;
            }
        }
    }

    fn rsvd_bits(&self, spte: u64, level: PgLevel) -> u64 {
        let bit7 = ((spte >> 7) & 1) as usize;
        self.rsvd_bits_mask[bit7][level.as_index()]
    }

    fn bad_xwr(&self, spte: u64) -> bool {
        self.bad_mt_xwr & (1u64 << (spte & 0x3f)) != 0
    }

    /// Whether `spte` at `level` sets any bit this format reserves.
    pub fn is_rsvd_spte(&self, spte: u64, level: PgLevel) -> bool {
        self.bad_xwr(spte) || spte & self.rsvd_bits(spte, level) != 0
    }
}
