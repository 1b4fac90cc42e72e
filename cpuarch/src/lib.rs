// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_std]

pub mod ept;
pub mod esr;
pub mod ffa;
pub mod mtrr;
pub mod paging;
pub mod psci;
pub mod smccc;
