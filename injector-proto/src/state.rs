//! Numeric codes carried by `state` commands.

use crate::{Error, Result};

/// Action requested by a `state` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum StateCode {
    /// Liveness check.
    Ping = 0,
    /// Liveness reply.
    Pong = 0x01,
    /// Reset the target.
    TargetReset = 0x100,
    /// Identify the target.
    TargetIdent = 0x110,
    /// Erase the whole flash.
    EraseFull = 0x200,
    /// Erase an address range.
    EraseRange = 0x201,
    /// Program the firmware image.
    ProgramFirmware = 0x300,
    /// Program an arbitrary blob.
    ProgramBlob = 0x301,
    /// Verify the whole flash.
    VerifyFull = 0x400,
    /// Verify an address range.
    VerifyRange = 0x401,
    /// Run the internal self test.
    SelfTest = 0x1000,
    /// Run the external test.
    ExternTest = 0x2000,
    /// Measure power consumption.
    PowerConsumptionTest = 0x2001,
    /// Read target memory.
    ReadMemory = 0x3000,
    /// Write target memory.
    WriteMemory = 0x4000,
    /// Show a success message.
    DisplaySuccess = 0x5000,
    /// Show an info message.
    DisplayInfo = 0x5001,
    /// Show a warning message.
    DisplayWarning = 0x5002,
    /// Show an error message.
    DisplayError = 0x5003,
    /// Reboot the station.
    HostReboot = 0xffff_0000,
    /// Start a station firmware update.
    HostOta = 0xffff_0010,
    /// Reload station configuration.
    HostLoadConfig = 0xffff_0020,
}

impl StateCode {
    /// Reads the little-endian `u32` code at the start of a command payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let raw: [u8; 4] = payload
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("state payload too short: {} bytes", payload.len()))
            })?;
        Self::try_from(u32::from_le_bytes(raw))
    }
}

impl From<StateCode> for u32 {
    fn from(code: StateCode) -> Self {
        code as Self
    }
}

impl TryFrom<u32> for StateCode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::Ping,
            0x01 => Self::Pong,
            0x100 => Self::TargetReset,
            0x110 => Self::TargetIdent,
            0x200 => Self::EraseFull,
            0x201 => Self::EraseRange,
            0x300 => Self::ProgramFirmware,
            0x301 => Self::ProgramBlob,
            0x400 => Self::VerifyFull,
            0x401 => Self::VerifyRange,
            0x1000 => Self::SelfTest,
            0x2000 => Self::ExternTest,
            0x2001 => Self::PowerConsumptionTest,
            0x3000 => Self::ReadMemory,
            0x4000 => Self::WriteMemory,
            0x5000 => Self::DisplaySuccess,
            0x5001 => Self::DisplayInfo,
            0x5002 => Self::DisplayWarning,
            0x5003 => Self::DisplayError,
            0xffff_0000 => Self::HostReboot,
            0xffff_0010 => Self::HostOta,
            0xffff_0020 => Self::HostLoadConfig,
            other => return Err(Error::NotSupported(format!("state code {other:#x}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_u32() {
        for code in [
            StateCode::Ping,
            StateCode::EraseRange,
            StateCode::PowerConsumptionTest,
            StateCode::HostLoadConfig,
        ] {
            assert_eq!(StateCode::try_from(u32::from(code)).unwrap(), code);
        }
    }

    #[test]
    fn payload_prefix_is_little_endian() {
        let payload = [0x00, 0x30, 0x00, 0x00, 0xde, 0xad];
        assert_eq!(StateCode::from_payload(&payload).unwrap(), StateCode::ReadMemory);
        assert_eq!(
            StateCode::from_payload(&0x2000u32.to_le_bytes()).unwrap(),
            StateCode::ExternTest
        );
    }

    #[test]
    fn rejects_unknown_and_short() {
        assert!(matches!(StateCode::try_from(0x7777), Err(Error::NotSupported(_))));
        assert!(matches!(StateCode::from_payload(&[1, 2]), Err(Error::InvalidArgument(_))));
    }
}
