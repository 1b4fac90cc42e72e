// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host memory as seen by the hypervisor: address translation, typed copies
//! of host objects, the host-to-hypervisor sharing registry and the private
//! VA range.

extern crate alloc;

use crate::address::{Address, HostVirtAddr, HypVirtAddr, PhysAddr};
use crate::error::HypError;
use crate::hyp::Hyp;
use crate::types::{Errno, MAX_ERRNO, PAGE_SHIFT, PAGE_SIZE};
use crate::utils::{checked_align_up, get_order, page_offset};
use alloc::collections::btree_map::{BTreeMap, Entry};
use core::fmt;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ops::Range;
use core::ptr;
use zerocopy::{FromBytes, IntoBytes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemError {
    /// Host address outside the window mirrored into the hypervisor.
    OutOfWindow,
    /// Host object not aligned for its type.
    Misaligned,
    /// Page already shared with the hypervisor.
    AlreadyShared,
    /// Page not shared with the hypervisor.
    NotShared,
    /// Shared page is pinned by a hypervisor object.
    Pinned,
    /// Private VA range exhausted.
    NoVirtualSpace,
}

impl From<MemError> for HypError {
    fn from(err: MemError) -> Self {
        Self::Mem(err)
    }
}

impl From<MemError> for Errno {
    fn from(err: MemError) -> Self {
        match err {
            MemError::OutOfWindow | MemError::Misaligned => Errno::EINVAL,
            MemError::AlreadyShared | MemError::NotShared => Errno::EPERM,
            MemError::Pinned => Errno::EBUSY,
            MemError::NoVirtualSpace => Errno::ENOMEM,
        }
    }
}

/// A host object of type `T` inside the mirrored window. Only copies of the
/// object are handed out; the host may change it at any time.
pub struct HostPtr<T> {
    addr: HypVirtAddr,
    _phantom: PhantomData<*mut T>,
}

impl<T> fmt::Debug for HostPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPtr").field("addr", &self.addr).finish()
    }
}

impl<T> Clone for HostPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HostPtr<T> {}

// SAFETY: a HostPtr is an address; all accesses are volatile copies.
unsafe impl<T> Send for HostPtr<T> {}
// SAFETY: see above.
unsafe impl<T> Sync for HostPtr<T> {}

impl<T: FromBytes + IntoBytes> HostPtr<T> {
    pub fn addr(&self) -> HypVirtAddr {
        self.addr
    }

    /// # Safety
    ///
    /// The window the pointer was translated through must be mapped in the
    /// hypervisor for as long as the pointer is used.
    pub unsafe fn read(&self) -> T {
        // SAFETY: the address is aligned and inside the mapped window, and
        // any bit pattern is a valid T.
        unsafe { ptr::read_volatile(self.addr.as_ptr::<T>()) }
    }

    /// # Safety
    ///
    /// Same as [`Self::read()`].
    pub unsafe fn write(&self, val: T) {
        // SAFETY: see read().
        unsafe { ptr::write_volatile(self.addr.as_mut_ptr::<T>(), val) }
    }
}

/// Folds a mapping result into one register: the address on success, the
/// negated errno (in the top 4095 values) on failure.
pub fn encode_err_ptr(res: Result<HypVirtAddr, Errno>) -> u64 {
    match res {
        Ok(addr) => addr.bits(),
        Err(e) => e.to_reg(),
    }
}

pub fn decode_err_ptr(val: u64) -> Result<HypVirtAddr, Errno> {
    if val >= MAX_ERRNO.wrapping_neg() {
        // MAX_ERRNO bounds the value, so from_reg cannot fail.
        return Err(Errno::from_reg(val).unwrap_or(Errno::EINVAL));
    }
    Ok(HypVirtAddr::new(val))
}

/// Host pages shared with the hypervisor, with the number of hypervisor
/// objects pinning each page.
#[derive(Debug, Default)]
pub struct SharedPages {
    pages: BTreeMap<u64, u32>,
}

impl SharedPages {
    pub fn share(&mut self, pfn: u64) -> Result<(), MemError> {
        match self.pages.entry(pfn) {
            Entry::Occupied(_) => Err(MemError::AlreadyShared),
            Entry::Vacant(e) => {
                e.insert(0);
                Ok(())
            }
        }
    }

    pub fn unshare(&mut self, pfn: u64) -> Result<(), MemError> {
        match self.pages.get(&pfn) {
            None => Err(MemError::NotShared),
            Some(&pins) if pins > 0 => Err(MemError::Pinned),
            Some(_) => {
                self.pages.remove(&pfn);
                Ok(())
            }
        }
    }

    pub fn is_shared(&self, pfn: u64) -> bool {
        self.pages.contains_key(&pfn)
    }

    fn all_shared(&self, mut pfns: Range<u64>) -> bool {
        pfns.all(|pfn| self.is_shared(pfn))
    }

    /// Pins every page in `pfns`. Fails without side effects unless all of
    /// them are shared.
    pub fn pin(&mut self, pfns: Range<u64>) -> Result<(), MemError> {
        if !self.all_shared(pfns.clone()) {
            return Err(MemError::NotShared);
        }
        for pfn in pfns {
            if let Some(pins) = self.pages.get_mut(&pfn) {
                *pins += 1;
            }
        }
        Ok(())
    }

    pub fn unpin(&mut self, pfns: Range<u64>) {
        for pfn in pfns {
            match self.pages.get_mut(&pfn) {
                Some(pins) if *pins > 0 => *pins -= 1,
                _ => log::warn!("Unpinning pfn {:#x} which is not pinned", pfn),
            }
        }
    }

    pub fn pin_count(&self, pfn: u64) -> Option<u32> {
        self.pages.get(&pfn).copied()
    }
}

/// Bump allocator over the hypervisor's private VA range.
#[derive(Debug)]
pub struct PrivateVaAllocator {
    cursor: HypVirtAddr,
    end: HypVirtAddr,
}

impl PrivateVaAllocator {
    pub fn new(start: HypVirtAddr, end: HypVirtAddr) -> Self {
        Self { cursor: start, end }
    }

    /// Reserves `size` bytes aligned to the order of `size`.
    pub fn alloc(&mut self, size: u64) -> Result<HypVirtAddr, MemError> {
        let align = 1u64
            .checked_shl(PAGE_SHIFT + get_order(size))
            .ok_or(MemError::NoVirtualSpace)?;
        let addr = checked_align_up(self.cursor.bits(), align).ok_or(MemError::NoVirtualSpace)?;
        let base = checked_align_up(size, PAGE_SIZE)
            .and_then(|size| addr.checked_add(size))
            .ok_or(MemError::NoVirtualSpace)?;

        if addr == 0 || base > self.end.bits() {
            return Err(MemError::NoVirtualSpace);
        }

        self.cursor = HypVirtAddr::new(base);
        Ok(HypVirtAddr::new(addr))
    }
}

/// Page frame numbers covering `[pa, pa + len)`.
fn pfn_range(pa: PhysAddr, len: u64) -> Range<u64> {
    let start = pa.pfn();
    let end = pa.bits().saturating_add(len.max(1) - 1) >> PAGE_SHIFT;
    start..end + 1
}

impl Hyp<'_> {
    /// Translates `[va, va + len)` into the hypervisor, checking that it lies
    /// in the mirrored window.
    pub fn host_va_to_hyp(&self, va: HostVirtAddr, len: u64) -> Result<HypVirtAddr, MemError> {
        let layout = &self.config.va_layout;
        if !layout.contains(va, len) {
            return Err(MemError::OutOfWindow);
        }
        Ok(layout.kern_hyp_va(va))
    }

    /// Translation of a value that is only stored, never dereferenced.
    pub fn kern_hyp_va(&self, va: u64) -> u64 {
        self.config
            .va_layout
            .kern_hyp_va(HostVirtAddr::new(va))
            .bits()
    }

    pub fn host_ptr<T: FromBytes + IntoBytes>(
        &self,
        va: HostVirtAddr,
    ) -> Result<HostPtr<T>, MemError> {
        let addr = self.host_va_to_hyp(va, size_of::<T>() as u64)?;
        if !addr.is_aligned(align_of::<T>() as u64) {
            return Err(MemError::Misaligned);
        }
        Ok(HostPtr {
            addr,
            _phantom: PhantomData,
        })
    }

    fn host_pfns(&self, va: HostVirtAddr, len: u64) -> Result<Range<u64>, MemError> {
        if !self.config.va_layout.contains(va, len) {
            return Err(MemError::OutOfWindow);
        }
        let pa = self
            .config
            .va_layout
            .host_pa(va)
            .ok_or(MemError::OutOfWindow)?;
        Ok(pfn_range(pa, len))
    }

    pub fn host_share_hyp(&self, pfn: u64) -> Result<(), HypError> {
        self.shared.lock().share(pfn)?;
        Ok(())
    }

    pub fn host_unshare_hyp(&self, pfn: u64) -> Result<(), HypError> {
        self.shared.lock().unshare(pfn)?;
        Ok(())
    }

    pub fn shared_pin_count(&self, pfn: u64) -> Option<u32> {
        self.shared.locked_do(|shared| shared.pin_count(pfn))
    }

    /// Whether every page of the host object at `va` is shared.
    pub fn host_range_shared(&self, va: HostVirtAddr, len: u64) -> bool {
        match self.host_pfns(va, len) {
            Ok(pfns) => self.shared.lock().all_shared(pfns),
            Err(_) => false,
        }
    }

    /// Pins the shared host object of type `T` at `va` and returns a
    /// pointer to it.
    pub fn pin_host_object<T: FromBytes + IntoBytes>(
        &self,
        va: HostVirtAddr,
    ) -> Result<HostPtr<T>, MemError> {
        let ptr = self.host_ptr::<T>(va)?;
        let pfns = self.host_pfns(va, size_of::<T>() as u64)?;
        self.shared.lock().pin(pfns)?;
        Ok(ptr)
    }

    pub fn unpin_host_object<T>(&self, va: HostVirtAddr) {
        if let Ok(pfns) = self.host_pfns(va, size_of::<T>() as u64) {
            self.shared.lock().unpin(pfns);
        }
    }

    /// Maps `size` bytes at `phys` into the private VA range. The returned
    /// address keeps the page offset of `phys`.
    pub fn create_private_mapping(
        &self,
        phys: PhysAddr,
        size: u64,
        prot: u64,
    ) -> Result<HypVirtAddr, HypError> {
        let offset = page_offset(phys.bits());
        let size = size
            .checked_add(offset)
            .and_then(|size| checked_align_up(size, PAGE_SIZE))
            .ok_or(MemError::NoVirtualSpace)?;

        let addr = self.private_va.lock().alloc(size)?;
        self.backend
            .create_mappings(addr, size, phys.page_align(), prot)?;

        Ok(addr + offset)
    }
}
