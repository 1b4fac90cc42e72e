// SPDX-License-Identifier: MIT OR Apache-2.0

//! The nVHE hypervisor's host-facing side: trap classification, the host
//! hypercall table and the firmware-call relay.

extern crate alloc;

pub mod backend;
pub mod context;
pub mod errors;
pub mod ffa;
mod handlers;
pub mod hcall;
pub mod mem;
pub mod pkvm;
pub mod psci;
pub mod smc;
pub mod trap;
pub mod vcpu;

pub use backend::{HypBackend, SmcccRes, SysReg};
pub use context::HostCpuContext;
pub use errors::{HcallError, SmcccRet};
pub use hcall::{handle_host_hcall, KvmHostFunc};
pub use smc::handle_host_smc;
pub use trap::handle_trap;

use crate::config::HypConfig;
use crate::error::HypError;
use crate::locking::SpinLock;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use mem::{PrivateVaAllocator, SharedPages};
use pkvm::VmTable;

/// Entry point and context the host asked a CPU to start at, kept while
/// the CPU goes through the hypervisor's own entry code.
#[derive(Debug, Default)]
pub struct PsciBootArgs {
    /// Held while a CPU_ON for this CPU is in flight.
    lock: AtomicU32,
    pc: AtomicU64,
    r0: AtomicU64,
}

impl PsciBootArgs {
    pub fn try_acquire(&self) -> bool {
        self.lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release(&self) {
        self.lock.store(0, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.lock.load(Ordering::Relaxed) != 0
    }

    pub fn set(&self, pc: u64, r0: u64) {
        self.pc.store(pc, Ordering::Relaxed);
        self.r0.store(r0, Ordering::Relaxed);
    }

    pub fn pc(&self) -> u64 {
        self.pc.load(Ordering::Relaxed)
    }

    pub fn r0(&self) -> u64 {
        self.r0.load(Ordering::Relaxed)
    }
}

/// Hypervisor state of one physical CPU.
#[derive(Debug, Default)]
pub struct HypPerCpu {
    prot_finalized: AtomicBool,
    cpu_on_args: PsciBootArgs,
    suspend_args: PsciBootArgs,
}

impl HypPerCpu {
    pub fn cpu_on_args(&self) -> &PsciBootArgs {
        &self.cpu_on_args
    }

    pub fn suspend_args(&self) -> &PsciBootArgs {
        &self.suspend_args
    }

    pub fn prot_finalized(&self) -> bool {
        self.prot_finalized.load(Ordering::Acquire)
    }
}

/// One hypervisor instance. Every physical CPU enters it through
/// [`handle_trap()`] with its own [`HostCpuContext`].
#[derive(Debug)]
pub struct Hyp<'a> {
    backend: &'a dyn HypBackend,
    config: HypConfig,
    protected_initialized: AtomicBool,
    percpu: Vec<HypPerCpu>,
    vms: SpinLock<VmTable>,
    shared: SpinLock<SharedPages>,
    private_va: SpinLock<PrivateVaAllocator>,
}

impl<'a> Hyp<'a> {
    pub fn new(backend: &'a dyn HypBackend, config: HypConfig) -> Result<Self, HypError> {
        config.validate()?;

        let percpu = (0..config.nr_cpus()).map(|_| HypPerCpu::default()).collect();
        let private_va = PrivateVaAllocator::new(config.private_va_start, config.private_va_end);

        Ok(Self {
            backend,
            config,
            protected_initialized: AtomicBool::new(false),
            percpu,
            vms: SpinLock::new(VmTable::new()),
            shared: SpinLock::new(SharedPages::default()),
            private_va: SpinLock::new(private_va),
        })
    }

    pub fn config(&self) -> &HypConfig {
        &self.config
    }

    pub fn backend(&self) -> &'a dyn HypBackend {
        self.backend
    }

    /// Raises the hypercall floor. Called once by the boot sequence after
    /// the protected-mode setup calls are done; there is no way back.
    pub fn set_protected_mode_initialized(&self) {
        if !self.protected_initialized.swap(true, Ordering::Release) {
            log::info!("pKVM: protected mode initialized, host hypercall floor raised");
        }
    }

    pub fn protected_mode_initialized(&self) -> bool {
        self.protected_initialized.load(Ordering::Acquire)
    }

    pub fn percpu(&self, cpu: usize) -> Option<&HypPerCpu> {
        self.percpu.get(cpu)
    }

    /// Index of the CPU with the given MPIDR affinity.
    pub fn cpu_by_mpidr(&self, mpidr: u64) -> Option<usize> {
        self.config.cpus.iter().position(|c| c.mpidr == mpidr)
    }
}
