// SPDX-License-Identifier: MIT OR Apache-2.0

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

pub const MAX_CPUS: usize = 512;

/// Largest errno value that can be folded into a pointer-sized return.
pub const MAX_ERRNO: u64 = 4095;

/// Negative-errno error code as carried in hypercall return registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Self = Self(1);
    pub const ENOENT: Self = Self(2);
    pub const ENOMEM: Self = Self(12);
    pub const EFAULT: Self = Self(14);
    pub const EBUSY: Self = Self(16);
    pub const EINVAL: Self = Self(22);

    /// Builds an errno from its positive value, e.g. `22` for `EINVAL`.
    pub const fn new(errno: i32) -> Self {
        Self(errno)
    }

    pub const fn errno(self) -> i32 {
        self.0
    }

    /// Register encoding: the negated value, sign-extended to 64 bits.
    pub fn to_reg(self) -> u64 {
        (-i64::from(self.0)) as u64
    }

    /// Decodes a register value holding a negative errno.
    pub fn from_reg(val: u64) -> Option<Self> {
        let neg = (val as i64).checked_neg()?;
        if neg > 0 && neg as u64 <= MAX_ERRNO {
            Some(Self(neg as i32))
        } else {
            None
        }
    }
}
