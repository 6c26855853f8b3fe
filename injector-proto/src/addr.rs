//! Six-byte hardware address used to key every topic.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Fixed 6-byte hardware (MAC) address of the station.
///
/// Rendered as 12 lowercase hex digits without separators, e.g.
/// `aabbccddeeff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareAddr([u8; 6]);

impl HardwareAddr {
    /// Wraps raw address bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Returns the raw address bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for HardwareAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for HardwareAddr {
    type Err = Error;

    /// Parses `aabbccddeeff`, `AA:BB:CC:DD:EE:FF` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().chars().filter(|c| *c != ':' && *c != '-').collect();
        if digits.len() != 12 || !digits.is_ascii() {
            return Err(Error::InvalidArgument(format!("hardware address: {s}")));
        }

        let mut out = [0u8; 6];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidArgument(format!("hardware address: {s}")))?;
        }
        Ok(Self(out))
    }
}
