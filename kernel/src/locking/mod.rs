// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod spinlock;

pub use spinlock::{LockGuard, SpinLock};
