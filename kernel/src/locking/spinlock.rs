// SPDX-License-Identifier: MIT OR Apache-2.0

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

/// A guard that provides exclusive access to the data protected by a
/// [`SpinLock`]. The lock is released when the guard is dropped.
#[derive(Debug)]
#[must_use = "if unused the SpinLock will immediately unlock"]
pub struct LockGuard<'a, T> {
    holder: &'a AtomicU64,
    data: &'a mut T,
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.holder.fetch_add(1, Ordering::Release);
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

/// A ticket lock. Code at EL2 runs with interrupts masked, so there is no
/// interrupt state to save or restore around the critical section.
///
/// # Examples
///
/// ```
/// use hypcore::locking::SpinLock;
///
/// let spin_lock = SpinLock::new(0);
///
/// // Acquire the lock and modify the protected data.
/// {
///     let mut guard = spin_lock.lock();
///     *guard += 1;
/// }; // Lock is automatically released when `guard` goes out of scope.
///
/// assert_eq!(*spin_lock.lock(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SpinLock<T> {
    /// Next ticket to hand out.
    current: AtomicU64,
    /// Ticket currently allowed into the critical section.
    holder: AtomicU64,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            current: AtomicU64::new(0),
            holder: AtomicU64::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> LockGuard<'_, T> {
        let ticket = self.current.fetch_add(1, Ordering::Relaxed);
        loop {
            let h = self.holder.load(Ordering::Acquire);
            if h == ticket {
                break;
            }
            core::hint::spin_loop();
        }
        LockGuard {
            holder: &self.holder,
            // SAFETY: holding the ticket grants exclusive access.
            data: unsafe { &mut *self.data.get() },
        }
    }

    pub fn locked_do<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let mut l = self.lock();
        f(&mut l)
    }
}
