//! Command set of the HyISP bootloader.
//!
//! Every opcode the device understands is listed in [`Opcode`], together
//! with the shape of the response it produces.

use std::fmt;

use super::constants::{HOST_FRAME_MARKER, MAX_PAYLOAD_LEN};
use super::frame::{FrameError, build_frame};

/// Opcodes understood by the ISP firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Query the ISP (bootloader) firmware version.
    GetFwVersionIsp = 0xB0,
    /// Query the keyboard (application) firmware version.
    GetFwVersionKbd = 0x4E,
    /// Switch the application firmware into ISP mode.
    EnterIspMode = 0x0A,
    /// Switch into the bootloader ISP mode.
    EnterBlIspMode = 0xAA,
    /// Reboot the controller. The device drops off the bus.
    ResetChip = 0xAF,
    /// Write one block of the image.
    WriteBlock = 0xA1,
    /// Erase the application flash.
    EraseChip = 0xA4,
    /// Submit the scrambled profile header for validation.
    GetFwProfile = 0xA5,
}

/// What a successful response to an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Only the non-zero status byte matters.
    Ack,
    /// A single version byte at frame offset 4.
    Version,
    /// A result byte at frame offset 3 that must be zero.
    Checked,
}

impl Opcode {
    pub const ALL: [Opcode; 8] = [
        Opcode::GetFwVersionIsp,
        Opcode::GetFwVersionKbd,
        Opcode::EnterIspMode,
        Opcode::EnterBlIspMode,
        Opcode::ResetChip,
        Opcode::WriteBlock,
        Opcode::EraseChip,
        Opcode::GetFwProfile,
    ];

    /// Wire value of the opcode.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Look up an opcode by wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_u8() == value)
    }

    /// Shape of the response the device sends for this opcode.
    pub const fn response_shape(self) -> ResponseShape {
        match self {
            Opcode::GetFwVersionIsp | Opcode::GetFwVersionKbd => ResponseShape::Version,
            Opcode::WriteBlock | Opcode::EraseChip => ResponseShape::Checked,
            Opcode::EnterIspMode
            | Opcode::EnterBlIspMode
            | Opcode::ResetChip
            | Opcode::GetFwProfile => ResponseShape::Ack,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::GetFwVersionIsp => "GET_FW_VERSION_ISP",
            Opcode::GetFwVersionKbd => "GET_FW_VERSION_KBD",
            Opcode::EnterIspMode => "ENTER_ISP_MODE",
            Opcode::EnterBlIspMode => "ENTER_BL_ISP_MODE",
            Opcode::ResetChip => "RESET_CHIP",
            Opcode::WriteBlock => "WRITE_BLOCK",
            Opcode::EraseChip => "ERASE_CHIP",
            Opcode::GetFwProfile => "GET_FW_PROFILE",
        };
        write!(f, "{}(0x{:02X})", name, self.as_u8())
    }
}

/// A single request: opcode plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl Command {
    /// Build a command, rejecting payloads that do not fit in one frame.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self { opcode, payload })
    }

    /// Command without payload.
    pub fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Wire frame for this command.
    pub fn to_frame(&self) -> Vec<u8> {
        build_frame(HOST_FRAME_MARKER, self.opcode.as_u8(), &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::GetFwVersionIsp.as_u8(), 0xB0);
        assert_eq!(Opcode::GetFwVersionKbd.as_u8(), 0x4E);
        assert_eq!(Opcode::EnterIspMode.as_u8(), 0x0A);
        assert_eq!(Opcode::EnterBlIspMode.as_u8(), 0xAA);
        assert_eq!(Opcode::ResetChip.as_u8(), 0xAF);
        assert_eq!(Opcode::WriteBlock.as_u8(), 0xA1);
        assert_eq!(Opcode::EraseChip.as_u8(), 0xA4);
        assert_eq!(Opcode::GetFwProfile.as_u8(), 0xA5);
    }

    #[test]
    fn test_from_u8_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x00), None);
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            Opcode::GetFwVersionKbd.response_shape(),
            ResponseShape::Version
        );
        assert_eq!(Opcode::EraseChip.response_shape(), ResponseShape::Checked);
        assert_eq!(Opcode::WriteBlock.response_shape(), ResponseShape::Checked);
        assert_eq!(Opcode::GetFwProfile.response_shape(), ResponseShape::Ack);
    }

    #[test]
    fn test_command_rejects_long_payload() {
        assert!(Command::new(Opcode::WriteBlock, vec![0u8; 253]).is_ok());
        let err = Command::new(Opcode::WriteBlock, vec![0u8; 254]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLong { len: 254, .. }));
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::ResetChip.to_string(), "RESET_CHIP(0xAF)");
    }
}
