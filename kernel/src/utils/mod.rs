// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod immut_after_init;
pub mod util;

pub use util::{checked_align_up, genmask, get_order, page_offset, repeat_byte, rsvd_bits};
