// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::HypError;
use crate::hyp::mem::MemError;
use crate::hyp::pkvm::PkvmError;
use crate::types::Errno;
use cpuarch::smccc::{
    SMCCC_RET_INVALID_PARAMETER, SMCCC_RET_NOT_REQUIRED, SMCCC_RET_NOT_SUPPORTED,
    SMCCC_RET_SUCCESS,
};

/// Generic SMCCC status written to register 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmcccRet {
    Success,
    NotSupported,
    NotRequired,
    InvalidParameter,
}

impl From<SmcccRet> for u64 {
    fn from(res: SmcccRet) -> u64 {
        let val = match res {
            SmcccRet::Success => SMCCC_RET_SUCCESS,
            SmcccRet::NotSupported => SMCCC_RET_NOT_SUPPORTED,
            SmcccRet::NotRequired => SMCCC_RET_NOT_REQUIRED,
            SmcccRet::InvalidParameter => SMCCC_RET_INVALID_PARAMETER,
        };
        val as u64
    }
}

/// Failure of a host hypercall handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HcallError {
    /// The call itself is refused; the status replaces register 0.
    RequestError(SmcccRet),
    /// The call failed; the negated errno is returned in register 1.
    Errno(Errno),
}

macro_rules! impl_req_err {
    ($name:ident, $v:ident) => {
        pub fn $name() -> Self {
            Self::RequestError(SmcccRet::$v)
        }
    };
}

impl HcallError {
    impl_req_err!(not_supported, NotSupported);
    impl_req_err!(invalid_parameter, InvalidParameter);
}

impl From<Errno> for HcallError {
    fn from(errno: Errno) -> Self {
        Self::Errno(errno)
    }
}

impl From<HypError> for HcallError {
    fn from(err: HypError) -> Self {
        Self::Errno(err.into())
    }
}

impl From<MemError> for HcallError {
    fn from(err: MemError) -> Self {
        Self::Errno(err.into())
    }
}

impl From<PkvmError> for HcallError {
    fn from(err: PkvmError) -> Self {
        Self::Errno(err.into())
    }
}
