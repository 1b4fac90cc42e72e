// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protected VMs: the handle table, shadow vCPU registration and the
//! load/put checkout that keeps a vCPU on at most one physical CPU.

extern crate alloc;

use crate::address::{Address, HostVirtAddr};
use crate::error::HypError;
use crate::hyp::mem::HostPtr;
use crate::hyp::vcpu::{HostKvm, HostVcpu, VcpuArch};
use crate::hyp::Hyp;
use crate::locking::{LockGuard, SpinLock};
use crate::types::Errno;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use zerocopy::FromZeros;

/// Maximum number of protected VMs alive at once.
pub const KVM_MAX_PVMS: usize = 255;
/// Handles start here so that 0 is never a valid handle.
pub const HANDLE_OFFSET: u32 = 0x1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkvmError {
    /// No VM with this handle.
    NoSuchVm,
    /// All VM slots are in use.
    TableFull,
    /// The host VM has no vCPUs.
    InvalidVcpuCount,
    /// vCPU registered out of order or beyond the VM's vCPU count.
    InvalidVcpuIdx,
    /// The object is in use.
    Busy,
    /// Memory donated by the host is unusable.
    DonationFailed,
}

impl From<PkvmError> for HypError {
    fn from(err: PkvmError) -> Self {
        Self::Pkvm(err)
    }
}

impl From<PkvmError> for Errno {
    fn from(err: PkvmError) -> Self {
        match err {
            PkvmError::NoSuchVm => Errno::ENOENT,
            PkvmError::TableFull | PkvmError::DonationFailed => Errno::ENOMEM,
            PkvmError::InvalidVcpuCount | PkvmError::InvalidVcpuIdx => Errno::EINVAL,
            PkvmError::Busy => Errno::EBUSY,
        }
    }
}

fn vm_table_idx(handle: u32) -> Option<usize> {
    handle.checked_sub(HANDLE_OFFSET).map(|idx| idx as usize)
}

fn idx_to_vm_handle(idx: usize) -> u32 {
    // idx < KVM_MAX_PVMS
    HANDLE_OFFSET + idx as u32
}

/// The hypervisor's private copy of a guest vCPU.
#[derive(Debug)]
pub struct HypVcpu {
    /// The host vCPU this one shadows. Pinned while registered.
    pub host_vcpu: HostPtr<HostVcpu>,
    host_vcpu_va: HostVirtAddr,
    pub vcpu_idx: u32,
    pub arch: VcpuArch,
}

#[derive(Debug)]
pub struct HypVcpuSlot {
    loaded: AtomicBool,
    state: SpinLock<HypVcpu>,
}

impl HypVcpuSlot {
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct HypVm {
    handle: u32,
    host_kvm: HostVirtAddr,
    created_vcpus: u32,
    vcpus: SpinLock<Vec<Arc<HypVcpuSlot>>>,
    /// Number of vCPUs of this VM currently loaded on some CPU.
    loaded: AtomicU32,
}

impl HypVm {
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn nr_vcpus(&self) -> usize {
        self.vcpus.lock().len()
    }
}

#[derive(Debug)]
pub struct VmTable {
    vms: Vec<Option<Arc<HypVm>>>,
}

impl VmTable {
    pub const fn new() -> Self {
        Self { vms: Vec::new() }
    }

    fn get(&self, handle: u32) -> Option<&Arc<HypVm>> {
        vm_table_idx(handle)
            .and_then(|idx| self.vms.get(idx))
            .and_then(Option::as_ref)
    }

    fn insert(&mut self, make: impl FnOnce(u32) -> HypVm) -> Result<Arc<HypVm>, PkvmError> {
        let idx = match self.vms.iter().position(Option::is_none) {
            Some(idx) => idx,
            None if self.vms.len() < KVM_MAX_PVMS => {
                self.vms.push(None);
                self.vms.len() - 1
            }
            None => return Err(PkvmError::TableFull),
        };
        let vm = Arc::new(make(idx_to_vm_handle(idx)));
        self.vms[idx] = Some(vm.clone());
        Ok(vm)
    }

    fn remove(&mut self, handle: u32) -> Option<Arc<HypVm>> {
        vm_table_idx(handle)
            .and_then(|idx| self.vms.get_mut(idx))
            .and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.vms.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VmTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A vCPU checked out to the current physical CPU. Dropping it puts the
/// vCPU back.
#[derive(Debug)]
pub struct LoadedHypVcpu {
    vm: Arc<HypVm>,
    slot: Arc<HypVcpuSlot>,
}

impl LoadedHypVcpu {
    pub fn handle(&self) -> u32 {
        self.vm.handle
    }

    pub fn vcpu(&self) -> LockGuard<'_, HypVcpu> {
        self.slot.state.lock()
    }
}

impl Drop for LoadedHypVcpu {
    fn drop(&mut self) {
        self.slot.loaded.store(false, Ordering::Release);
        self.vm.loaded.fetch_sub(1, Ordering::Release);
    }
}

impl Hyp<'_> {
    fn donation_ok(addr: HostVirtAddr) -> bool {
        !addr.is_null() && addr.is_page_aligned()
    }

    /// Creates the hypervisor's view of a protected VM and returns its
    /// handle.
    pub fn init_vm(
        &self,
        host_kvm: HostVirtAddr,
        vm_hva: HostVirtAddr,
        pgd_hva: HostVirtAddr,
    ) -> Result<u32, HypError> {
        let kvm_ptr = self.pin_host_object::<HostKvm>(host_kvm)?;

        let res = self.insert_vm(kvm_ptr, host_kvm, vm_hva, pgd_hva);
        if res.is_err() {
            self.unpin_host_object::<HostKvm>(host_kvm);
        }
        res
    }

    fn insert_vm(
        &self,
        kvm_ptr: HostPtr<HostKvm>,
        host_kvm: HostVirtAddr,
        vm_hva: HostVirtAddr,
        pgd_hva: HostVirtAddr,
    ) -> Result<u32, HypError> {
        // SAFETY: the pointer went through host_ptr() and the page is pinned.
        let kvm = unsafe { kvm_ptr.read() };
        if kvm.created_vcpus < 1 {
            return Err(PkvmError::InvalidVcpuCount.into());
        }
        if !Self::donation_ok(vm_hva) || !Self::donation_ok(pgd_hva) {
            return Err(PkvmError::DonationFailed.into());
        }

        let mut vms = self.vms.lock();
        let vm = vms.insert(|handle| HypVm {
            handle,
            host_kvm,
            created_vcpus: kvm.created_vcpus,
            vcpus: SpinLock::new(Vec::new()),
            loaded: AtomicU32::new(0),
        })?;

        if let Err(e) = self.backend.prepare_guest_stage2(vm.handle, pgd_hva) {
            vms.remove(vm.handle);
            return Err(e.into());
        }

        log::info!(
            "pKVM: created VM {:#x} with {} vCPUs",
            vm.handle,
            vm.created_vcpus
        );
        Ok(vm.handle)
    }

    /// Registers the next vCPU of VM `handle`, shadowing `host_vcpu`.
    pub fn init_vcpu(
        &self,
        handle: u32,
        host_vcpu: HostVirtAddr,
        vcpu_hva: HostVirtAddr,
    ) -> Result<(), HypError> {
        if !Self::donation_ok(vcpu_hva) {
            return Err(PkvmError::DonationFailed.into());
        }

        let vms = self.vms.lock();
        let vm = vms.get(handle).ok_or(PkvmError::NoSuchVm)?;
        let mut vcpus = vm.vcpus.lock();

        let idx = vcpus.len();
        if idx >= vm.created_vcpus as usize {
            return Err(PkvmError::InvalidVcpuIdx.into());
        }

        let ptr = self
            .pin_host_object::<HostVcpu>(host_vcpu)
            .map_err(|_| PkvmError::Busy)?;
        // SAFETY: translated by pin_host_object() and pinned.
        let host = unsafe { ptr.read() };
        if host.vcpu_idx as usize != idx {
            self.unpin_host_object::<HostVcpu>(host_vcpu);
            return Err(PkvmError::InvalidVcpuIdx.into());
        }

        vcpus.push(Arc::new(HypVcpuSlot {
            loaded: AtomicBool::new(false),
            state: SpinLock::new(HypVcpu {
                host_vcpu: ptr,
                host_vcpu_va: host_vcpu,
                vcpu_idx: host.vcpu_idx,
                arch: VcpuArch::new_zeroed(),
            }),
        }));
        Ok(())
    }

    /// Destroys VM `handle`. Refused while any of its vCPUs is loaded.
    pub fn teardown_vm(&self, handle: u32) -> Result<(), HypError> {
        let mut vms = self.vms.lock();
        let vm = vms.get(handle).ok_or(PkvmError::NoSuchVm)?;
        if vm.loaded.load(Ordering::Acquire) > 0 {
            return Err(PkvmError::Busy.into());
        }

        self.backend.teardown_guest_stage2(handle);
        let Some(vm) = vms.remove(handle) else {
            return Err(PkvmError::NoSuchVm.into());
        };

        for slot in vm.vcpus.lock().drain(..) {
            let va = slot.state.lock().host_vcpu_va;
            self.unpin_host_object::<HostVcpu>(va);
        }
        self.unpin_host_object::<HostKvm>(vm.host_kvm);

        log::info!("pKVM: destroyed VM {:#x}", handle);
        Ok(())
    }

    /// Checks out vCPU `vcpu_idx` of VM `handle` for the calling CPU.
    /// Returns `None` if it does not exist or is loaded elsewhere.
    pub fn load_hyp_vcpu(&self, handle: u32, vcpu_idx: u32) -> Option<LoadedHypVcpu> {
        let vms = self.vms.lock();
        let vm = vms.get(handle)?;
        let slot = vm.vcpus.lock().get(vcpu_idx as usize).cloned()?;

        if slot
            .loaded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            log::debug!(
                "pKVM: vCPU {} of VM {:#x} already loaded",
                vcpu_idx,
                handle
            );
            return None;
        }
        vm.loaded.fetch_add(1, Ordering::AcqRel);

        Some(LoadedHypVcpu {
            vm: vm.clone(),
            slot,
        })
    }

    pub fn nr_vms(&self) -> usize {
        self.vms.locked_do(|vms| vms.len())
    }
}
