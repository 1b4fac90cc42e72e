// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::hyp::backend::SysReg;
use crate::hyp::context::HostCpuContext;
use crate::hyp::hcall::handle_host_hcall;
use crate::hyp::smc::handle_host_smc;
use crate::hyp::Hyp;
use cpuarch::esr::{
    ESR_ELX_EC_DABT_LOW, ESR_ELX_EC_HVC64, ESR_ELX_EC_IABT_LOW, ESR_ELX_EC_SMC64, ESR_ELX_EC_SVE,
};

/// CPTR_EL2.TZ: trap SVE accesses (nVHE layout).
pub const CPTR_EL2_TZ: u64 = 1 << 8;
/// CPACR_EL1.ZEN: SVE enable for EL1 and EL0 (hVHE layout).
pub const CPACR_EL1_ZEN: u64 = (1 << 16) | (1 << 17);
/// ZCR_ELx.LEN: vector length in quadwords minus one.
pub const ZCR_ELX_LEN_MASK: u64 = 0xf;

fn update_sysreg(hyp: &Hyp<'_>, reg: SysReg, clear: u64, set: u64) {
    let old = hyp.backend.read_sysreg(reg);
    let new = (old & !clear) | set;
    if new != old {
        hyp.backend.write_sysreg(reg, new);
    }
}

/// The host touched SVE state: stop trapping it and give it the full
/// vector length.
fn handle_host_sve(hyp: &Hyp<'_>) {
    if hyp.config.has_hvhe {
        update_sysreg(hyp, SysReg::CpacrEl1, 0, CPACR_EL1_ZEN);
    } else {
        update_sysreg(hyp, SysReg::CptrEl2, CPTR_EL2_TZ, 0);
    }
    hyp.backend.isb();

    update_sysreg(hyp, SysReg::ZcrEl2, ZCR_ELX_LEN_MASK, ZCR_ELX_LEN_MASK);
}

/// Entry from the host's exception vector.
///
/// # Panics
///
/// Panics on an exception class the host cannot legitimately raise.
pub fn handle_trap(hyp: &Hyp<'_>, ctxt: &mut HostCpuContext) {
    match ctxt.esr.ec() {
        ESR_ELX_EC_HVC64 => handle_host_hcall(hyp, ctxt),
        ESR_ELX_EC_SMC64 => handle_host_smc(hyp, ctxt),
        ESR_ELX_EC_SVE => handle_host_sve(hyp),
        ESR_ELX_EC_IABT_LOW | ESR_ELX_EC_DABT_LOW => hyp.backend.handle_host_mem_abort(ctxt),
        ec => {
            log::error!(
                "Unexpected host trap on CPU {}: EC {:#x} ESR {:#x} ELR {:#x}",
                ctxt.cpu,
                ec,
                u64::from(ctxt.esr),
                ctxt.elr
            );
            panic!("unexpected host trap: EC {:#x}", ec);
        }
    }
}
