//! COM class identifiers as registered for ASIO drivers.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A parsed COM CLSID.
///
/// ASIO uses the driver's CLSID both to obtain the class factory and as the
/// interface id passed to `CreateInstance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Clsid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// Hex digit counts of the five dash-separated groups.
const GROUP_LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];

impl Clsid {
    /// Build a CLSID from its 128-bit big-endian textual value.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        let tail = value.to_be_bytes();
        Self {
            data1: (value >> 96) as u32,
            data2: (value >> 80) as u16,
            data3: (value >> 64) as u16,
            data4: [
                tail[8], tail[9], tail[10], tail[11], tail[12], tail[13], tail[14], tail[15],
            ],
        }
    }

    /// The 128-bit value in registry (textual) order.
    #[must_use]
    pub fn to_u128(&self) -> u128 {
        (u128::from(self.data1) << 96)
            | (u128::from(self.data2) << 80)
            | (u128::from(self.data3) << 64)
            | u128::from(u64::from_be_bytes(self.data4))
    }
}

impl FromStr for Clsid {
    type Err = CoreError;

    /// Parse the registry form `{E7E92954-EA17-433A-9142-EE419BE4875C}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidClsid(s.to_string());

        let inner = s
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(invalid)?;

        let groups: Vec<&str> = inner.split('-').collect();
        if groups.len() != GROUP_LENGTHS.len()
            || groups
                .iter()
                .zip(GROUP_LENGTHS)
                .any(|(g, len)| g.len() != len || !g.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(invalid());
        }

        let value = u128::from_str_radix(&groups.concat(), 16).map_err(|_| invalid())?;
        Ok(Self::from_u128(value))
    }
}

impl fmt::Display for Clsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}
