// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::address::{HostVirtAddr, PhysAddr};
use crate::types::Errno;
use cpuarch::esr::{Esr, AARCH64_INSN_SIZE};

pub const NR_HOST_REGS: usize = 31;

/// Register state of the host CPU that trapped into the hypervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostCpuContext {
    pub regs: [u64; NR_HOST_REGS],
    /// Return address of the trap (ELR_EL2).
    pub elr: u64,
    /// Syndrome of the trap (ESR_EL2).
    pub esr: Esr,
    /// Index of the physical CPU that took the trap.
    pub cpu: usize,
}

impl HostCpuContext {
    pub fn new(cpu: usize, esr: Esr) -> Self {
        Self {
            regs: [0; NR_HOST_REGS],
            elr: 0,
            esr,
            cpu,
        }
    }

    /// Value of `x<n>`. Out-of-range indices read as zero.
    pub fn reg(&self, n: usize) -> u64 {
        self.regs.get(n).copied().unwrap_or(0)
    }

    pub fn set_reg(&mut self, n: usize, val: u64) {
        if let Some(r) = self.regs.get_mut(n) {
            *r = val;
        }
    }

    /// Steps over the trapping instruction.
    pub fn skip_instr(&mut self) {
        self.elr = self.elr.wrapping_add(AARCH64_INSN_SIZE);
    }
}

/// Conversion of a raw argument register into a typed value.
pub trait FromReg: Sized {
    fn from_reg(reg: u64) -> Self;
}

/// Conversion of a typed result into a return register value.
pub trait IntoReg {
    fn into_reg(self) -> u64;
}

impl FromReg for u64 {
    fn from_reg(reg: u64) -> Self {
        reg
    }
}

impl FromReg for u32 {
    fn from_reg(reg: u64) -> Self {
        reg as u32
    }
}

impl FromReg for i32 {
    fn from_reg(reg: u64) -> Self {
        reg as i32
    }
}

impl FromReg for usize {
    fn from_reg(reg: u64) -> Self {
        reg as usize
    }
}

impl FromReg for PhysAddr {
    fn from_reg(reg: u64) -> Self {
        PhysAddr::new(reg)
    }
}

impl FromReg for HostVirtAddr {
    fn from_reg(reg: u64) -> Self {
        HostVirtAddr::new(reg)
    }
}

impl IntoReg for u64 {
    fn into_reg(self) -> u64 {
        self
    }
}

impl IntoReg for u32 {
    fn into_reg(self) -> u64 {
        u64::from(self)
    }
}

impl IntoReg for i32 {
    fn into_reg(self) -> u64 {
        i64::from(self) as u64
    }
}

impl IntoReg for Errno {
    fn into_reg(self) -> u64 {
        self.to_reg()
    }
}

impl IntoReg for Result<(), Errno> {
    fn into_reg(self) -> u64 {
        match self {
            Ok(()) => 0,
            Err(e) => e.to_reg(),
        }
    }
}

/// Binds argument register `$reg` of `$ctxt` to `$name`, converted to `$ty`.
macro_rules! declare_reg {
    ($ty:ty, $name:ident, $ctxt:expr, $reg:expr) => {
        let $name: $ty = <$ty as $crate::hyp::context::FromReg>::from_reg($ctxt.reg($reg));
    };
}

pub(crate) use declare_reg;
