// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::types::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;
use core::ops;

// The backing type to represent an address. Hypercall arguments arrive in
// 64-bit registers, so every address space uses the register width.
type InnerAddr = u64;

pub trait Address:
    Copy + From<InnerAddr> + Into<InnerAddr> + PartialEq + Eq + PartialOrd + Ord
{
    // Transform the address into its inner representation for easier
    /// arithmetic manipulation
    #[inline]
    fn bits(&self) -> InnerAddr {
        (*self).into()
    }

    #[inline]
    fn is_null(&self) -> bool {
        self.bits() == 0
    }

    #[inline]
    fn align_up(&self, align: InnerAddr) -> Self {
        Self::from((self.bits() + (align - 1)) & !(align - 1))
    }

    #[inline]
    fn page_align_up(&self) -> Self {
        self.align_up(PAGE_SIZE)
    }

    #[inline]
    fn page_align(&self) -> Self {
        Self::from(self.bits() & !(PAGE_SIZE - 1))
    }

    #[inline]
    fn is_aligned(&self, align: InnerAddr) -> bool {
        (self.bits() & (align - 1)) == 0
    }

    #[inline]
    fn is_aligned_to<T>(&self) -> bool {
        self.is_aligned(core::mem::align_of::<T>() as InnerAddr)
    }

    #[inline]
    fn is_page_aligned(&self) -> bool {
        self.is_aligned(PAGE_SIZE)
    }

    #[inline]
    fn checked_add(&self, off: InnerAddr) -> Option<Self> {
        self.bits().checked_add(off).map(|addr| addr.into())
    }

    #[inline]
    fn checked_sub(&self, off: InnerAddr) -> Option<Self> {
        self.bits().checked_sub(off).map(|addr| addr.into())
    }

    #[inline]
    fn page_offset(&self) -> InnerAddr {
        self.bits() & (PAGE_SIZE - 1)
    }

    #[inline]
    fn pfn(&self) -> InnerAddr {
        self.bits() >> PAGE_SHIFT
    }
}

macro_rules! impl_address {
    ($name:ident) => {
        impl $name {
            #[inline]
            pub const fn new(addr: InnerAddr) -> Self {
                Self(addr)
            }

            #[inline]
            pub const fn null() -> Self {
                Self(0)
            }

            #[inline]
            pub const fn as_u64(&self) -> InnerAddr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl From<InnerAddr> for $name {
            #[inline]
            fn from(addr: InnerAddr) -> Self {
                Self(addr)
            }
        }

        impl From<$name> for InnerAddr {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl ops::Sub<$name> for $name {
            type Output = InnerAddr;
            #[inline]
            fn sub(self, other: $name) -> Self::Output {
                self.0 - other.0
            }
        }

        impl ops::Add<InnerAddr> for $name {
            type Output = $name;
            #[inline]
            fn add(self, other: InnerAddr) -> Self {
                Self(self.0 + other)
            }
        }

        impl Address for $name {}
    };
}

/// Physical address as seen by the hypervisor and the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(InnerAddr);

impl_address!(PhysAddr);

/// A virtual address in the host kernel's address space. Never dereferenced
/// by the hypervisor before translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HostVirtAddr(InnerAddr);

impl_address!(HostVirtAddr);

/// A virtual address in the hypervisor's own address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HypVirtAddr(InnerAddr);

impl_address!(HypVirtAddr);

impl HypVirtAddr {
    #[inline]
    pub fn as_ptr<T>(&self) -> *const T {
        self.0 as usize as *const T
    }

    #[inline]
    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as usize as *mut T
    }
}

impl<T> From<*const T> for HypVirtAddr {
    #[inline]
    fn from(ptr: *const T) -> Self {
        Self(ptr as usize as InnerAddr)
    }
}

impl<T> From<*mut T> for HypVirtAddr {
    #[inline]
    fn from(ptr: *mut T) -> Self {
        Self(ptr as usize as InnerAddr)
    }
}
