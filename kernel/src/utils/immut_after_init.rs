// SPDX-License-Identifier: MIT OR Apache-2.0

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::Deref;
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(debug_assertions))]
pub type ImmutAfterInitResult<T> = Result<T, core::convert::Infallible>;

#[cfg(debug_assertions)]
pub type ImmutAfterInitResult<T> = Result<T, ImmutAfterInitError>;

#[cfg(all(debug_assertions, not(test)))]
static MULTI_THREADED: AtomicBool = AtomicBool::new(false);

// Unit tests run many hypervisor instances side by side in one process.
#[cfg(all(debug_assertions, test))]
extern crate std;
#[cfg(all(debug_assertions, test))]
std::thread_local! {
    static MULTI_THREADED: AtomicBool = const { AtomicBool::new(false) };
}

#[cfg(all(debug_assertions, not(test)))]
fn multi_threaded() -> bool {
    MULTI_THREADED.load(Ordering::Relaxed)
}

#[cfg(all(debug_assertions, test))]
fn multi_threaded() -> bool {
    MULTI_THREADED.with(|f| f.load(Ordering::Relaxed))
}

#[cfg(debug_assertions)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmutAfterInitError {
    AlreadyInit,
    Uninitialized,
    NotSingleThreaded,
}

/// A memory location which is written while the hypervisor is being brought
/// up and is read-only afterwards.
///
/// The hypervisor is initialized on a single CPU before any other CPU enters
/// it and before any guest exists, so the value can be read without locking
/// on every trap. Wrapping it in this type keeps the `unsafe{}` surface at the
/// writers and makes it easy to audit that the value is set once and before
/// first use.
///
/// # Examples
/// ```
/// # use hypcore::utils::immut_after_init::ImmutAfterInitCell;
/// static X: ImmutAfterInitCell<u64> = ImmutAfterInitCell::uninit();
/// pub fn main() {
///     X.init(&123).unwrap();
///     assert_eq!(*X, 123);
/// }
/// ```
///
/// A cell may be re-initialized when the owning component is reloaded, for
/// instance when a different paging mode is selected:
/// ```
/// # use hypcore::utils::immut_after_init::ImmutAfterInitCell;
/// static X: ImmutAfterInitCell<u64> = ImmutAfterInitCell::new(0);
/// pub fn main() {
///     assert_eq!(*X, 0);
///     X.reinit(&123).unwrap();
///     assert_eq!(*X, 123);
/// }
/// ```
#[derive(Debug)]
pub struct ImmutAfterInitCell<T: Copy> {
    #[doc(hidden)]
    data: UnsafeCell<MaybeUninit<T>>,
    // Used to keep track of the initialization state. Even though this
    // is atomic, the data structure does not guarantee thread safety.
    #[cfg(debug_assertions)]
    init: AtomicBool,
}

impl<T: Copy> ImmutAfterInitCell<T> {
    /// Create an unitialized `ImmutAfterInitCell` instance. The value must get
    /// initialized by means of [`Self::init()`] before first usage.
    pub const fn uninit() -> Self {
        Self {
            data: UnsafeCell::new(MaybeUninit::uninit()),
            #[cfg(debug_assertions)]
            init: AtomicBool::new(false),
        }
    }

    /// Create an initialized `ImmutAfterInitCell` instance from a value.
    pub const fn new(v: T) -> Self {
        Self {
            data: UnsafeCell::new(MaybeUninit::new(v)),
            #[cfg(debug_assertions)]
            init: AtomicBool::new(true),
        }
    }

    fn set_init(&self) {
        #[cfg(debug_assertions)]
        self.init.store(true, Ordering::Relaxed);
    }

    fn check_init(&self) -> ImmutAfterInitResult<()> {
        #[cfg(debug_assertions)]
        if !self.init.load(Ordering::Relaxed) {
            return Err(ImmutAfterInitError::Uninitialized);
        }
        Ok(())
    }

    fn check_uninit(&self) -> ImmutAfterInitResult<()> {
        #[cfg(debug_assertions)]
        if self.init.load(Ordering::Relaxed) {
            return Err(ImmutAfterInitError::AlreadyInit);
        }
        Ok(())
    }

    fn check_single_threaded(&self) -> ImmutAfterInitResult<()> {
        #[cfg(debug_assertions)]
        if multi_threaded() {
            return Err(ImmutAfterInitError::NotSingleThreaded);
        }
        Ok(())
    }

    // The caller must check the initialization status to avoid double init bugs
    unsafe fn set_inner(&self, v: &T) {
        self.set_init();
        // SAFETY: writers run before any reader exists.
        unsafe {
            (*self.data.get())
                .as_mut_ptr()
                .copy_from_nonoverlapping(v as *const T, 1)
        }
    }

    // The caller must ensure that the cell is initialized
    unsafe fn get_inner(&self) -> &T {
        // SAFETY: guaranteed by the caller.
        unsafe { (*self.data.get()).assume_init_ref() }
    }

    /// Returns the value, or an error if it was never initialized.
    pub fn try_get_inner(&self) -> ImmutAfterInitResult<&T> {
        self.check_init()?;
        // SAFETY: checked above in debug builds; release builds rely on the
        // boot sequence.
        unsafe { Ok(self.get_inner()) }
    }

    /// Initialize an uninitialized `ImmutAfterInitCell` instance from a value.
    ///
    /// Must **not** get called on an already initialized instance!
    ///
    /// * `v` - Initialization value.
    pub fn init(&self, v: &T) -> ImmutAfterInitResult<()> {
        self.check_uninit()?;
        self.check_single_threaded()?;
        // SAFETY: state checked above.
        unsafe { self.set_inner(v) };
        Ok(())
    }

    /// Reinitialize an `ImmutAfterInitCell` instance from a value.
    ///
    /// Must **not** get called while any borrow via [`Self::deref()`] is
    /// alive!
    ///
    /// * `v` - Initialization value.
    pub fn reinit(&self, v: &T) -> ImmutAfterInitResult<()> {
        self.check_single_threaded()?;
        // SAFETY: the caller upholds the no-outstanding-borrows rule.
        unsafe { self.set_inner(v) }
        Ok(())
    }
}

impl<T: Copy> Deref for ImmutAfterInitCell<T> {
    type Target = T;

    /// Dereference the wrapped value. Must **only ever** get called on an
    /// initialized instance!
    fn deref(&self) -> &T {
        self.try_get_inner().unwrap()
    }
}

/// Marks the end of single-CPU bring-up. Any later write to an
/// [`ImmutAfterInitCell`] fails in debug builds.
pub fn immut_after_init_set_multithreaded() {
    #[cfg(all(debug_assertions, not(test)))]
    MULTI_THREADED.store(true, Ordering::Relaxed);
    #[cfg(all(debug_assertions, test))]
    MULTI_THREADED.with(|f| f.store(true, Ordering::Relaxed));
}

unsafe impl<T: Copy + Send> Send for ImmutAfterInitCell<T> {}
unsafe impl<T: Copy + Send + Sync> Sync for ImmutAfterInitCell<T> {}
