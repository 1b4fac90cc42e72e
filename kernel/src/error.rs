// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::hyp::mem::MemError;
use crate::hyp::pkvm::PkvmError;
use crate::types::Errno;

// As a general rule, functions private to a given module may use the
// leaf error types. Public functions should return a HypError
// containing a leaf error type, usually the one corresponding to
// that module. We always provide a way to convert a leaf error into
// a HypError via the From trait at the module level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HypError {
    // Errors related to host memory: translation, sharing, private mappings
    Mem(MemError),
    // Errors from the protected VM table
    Pkvm(PkvmError),
    // Invalid address, usually provided by the host
    InvalidAddress,
    // A collaborator outside the core failed with the given errno
    Backend(Errno),
}

impl From<HypError> for Errno {
    fn from(err: HypError) -> Self {
        match err {
            HypError::Mem(e) => e.into(),
            HypError::Pkvm(e) => e.into(),
            HypError::InvalidAddress => Errno::EINVAL,
            HypError::Backend(errno) => errno,
        }
    }
}

impl From<Errno> for HypError {
    fn from(errno: Errno) -> Self {
        Self::Backend(errno)
    }
}
