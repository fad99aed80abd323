// SPDX-License-Identifier: Apache-2.0
#![forbid(unsafe_code)]

use core::{fmt, result::Result};

/// Four-character pixel format code as used by the V4L2 ABI.
///
/// The wire representation is a little-endian u32 with the first character
/// in the least significant byte, e.g. `FourCC(*b"RGB3")` is `0x33424752`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    const fn to_u32(self) -> u32 {
        (self.0[0] as u32)
            | (self.0[1] as u32) << 8
            | (self.0[2] as u32) << 16
            | (self.0[3] as u32) << 24
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC([
            (val & 0xff) as u8,
            (val >> 8 & 0xff) as u8,
            (val >> 16 & 0xff) as u8,
            (val >> 24 & 0xff) as u8,
        ])
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.to_u32()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                // Returning fmt::Error would make format!() panic, so fall
                // back to an escaped representation instead.
                let b = &self.0;
                f.write_fmt(format_args!(
                    "{}{}{}{}",
                    core::ascii::escape_default(b[0]),
                    core::ascii::escape_default(b[1]),
                    core::ascii::escape_default(b[2]),
                    core::ascii::escape_default(b[3])
                ))
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let b = self.0;
        f.debug_tuple("FourCC")
            .field(&format_args!(
                "{}{}{}{}",
                core::ascii::escape_default(b[0]),
                core::ascii::escape_default(b[1]),
                core::ascii::escape_default(b[2]),
                core::ascii::escape_default(b[3])
            ))
            .finish()
    }
}
