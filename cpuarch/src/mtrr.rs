// SPDX-License-Identifier: MIT OR Apache-2.0

/// Memory types as encoded in MTRRs, PAT entries and the EPT memtype field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MtrrType {
    Uncachable = 0,
    WriteComb = 1,
    WriteThrough = 4,
    WriteProtect = 5,
    WriteBack = 6,
}

impl MtrrType {
    pub const fn bits(self) -> u64 {
        self as u64
    }
}

impl TryFrom<u8> for MtrrType {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, u8> {
        match val {
            0 => Ok(Self::Uncachable),
            1 => Ok(Self::WriteComb),
            4 => Ok(Self::WriteThrough),
            5 => Ok(Self::WriteProtect),
            6 => Ok(Self::WriteBack),
            v => Err(v),
        }
    }
}
