//! Command frame: the closed set of requests a PDC (or splitter) sends upstream to a PMU.

use crate::error::CodecError;

/// The closed set of command codes defined by §3/§6.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Command {
    TurnOffTransmission,
    TurnOnTransmission,
    SendHeader,
    SendConfig1,
    SendConfig2,
    /// Accepted on the wire per Open Question (a); this crate has no Configuration Frame 3
    /// encoder and replies with [`Command::ExtendedFrame`]'s sibling negative acknowledgement
    /// (see [`crate::frame::Frame::negative_ack`]) rather than silently dropping it.
    SendConfig3,
    ExtendedFrame,
}

impl Command {
    pub fn code(self) -> u16 {
        match self {
            Command::TurnOffTransmission => 0x0001,
            Command::TurnOnTransmission => 0x0002,
            Command::SendHeader => 0x0003,
            Command::SendConfig1 => 0x0004,
            Command::SendConfig2 => 0x0005,
            Command::SendConfig3 => 0x0006,
            Command::ExtendedFrame => 0x0008,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, CodecError> {
        match code {
            0x0001 => Ok(Command::TurnOffTransmission),
            0x0002 => Ok(Command::TurnOnTransmission),
            0x0003 => Ok(Command::SendHeader),
            0x0004 => Ok(Command::SendConfig1),
            0x0005 => Ok(Command::SendConfig2),
            0x0006 => Ok(Command::SendConfig3),
            0x0008 => Ok(Command::ExtendedFrame),
            _ => Err(CodecError::FieldRange { field: "cmd" }),
        }
    }
}

/// A complete Command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CommandFrame {
    pub pmu_id: u16,
    pub soc: u32,
    pub frac_sec: u32,
    pub time_quality: u8,
    pub command: Command,
    /// Present only for [`Command::ExtendedFrame`]; empty otherwise.
    pub extframe: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_round_trip() {
        for cmd in [
            Command::TurnOffTransmission,
            Command::TurnOnTransmission,
            Command::SendHeader,
            Command::SendConfig1,
            Command::SendConfig2,
            Command::SendConfig3,
            Command::ExtendedFrame,
        ] {
            assert_eq!(Command::from_code(cmd.code()).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_code_is_field_range_error() {
        assert_eq!(
            Command::from_code(0x0007),
            Err(CodecError::FieldRange { field: "cmd" })
        );
    }
}
