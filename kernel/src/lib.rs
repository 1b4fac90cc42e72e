// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_std]

pub mod address;
pub mod config;
pub mod error;
pub mod hyp;
pub mod locking;
pub mod mmu;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod testutils;
