//! On-air payloads of the demo applications.
//!
//! Every payload opens with a 16-bit type tag sitting where the key exchange
//! frames carry their state word, so a receiver peeks one field to dispatch
//! either kind. Exchange state words stay below [`TAG_REPORT`]; application
//! tags start there. Tags are native-endian like the exchange frames;
//! payload fields after the tag are little-endian.

use thiserror_no_std::Error;

use crate::security::message::{STATE_REQUEST_KEY, STATE_SEND_KEY};

/// Environment report from a sensor node.
pub const TAG_REPORT: u16 = 0x0010;
/// Lamp command from a switch node.
pub const TAG_TOGGLE: u16 = 0x0011;
/// Lamp state broadcast by a light node.
pub const TAG_LIGHT_STATUS: u16 = 0x0012;

// Application tags and exchange state words share the leading field and
// must never overlap.
const _: () = assert!(STATE_REQUEST_KEY < TAG_REPORT);
const _: () = assert!(STATE_SEND_KEY < TAG_REPORT);

/// Type tag of a payload, if it is long enough to carry one.
pub fn peek_tag(payload: &[u8]) -> Option<u16> {
    let bytes = payload.get(..2)?;
    Some(u16::from_ne_bytes([bytes[0], bytes[1]]))
}

/// Errors from decoding a demo payload.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// The payload ended before the fields did.
    #[error("payload truncated")]
    Truncated,
    /// The tag belongs to a different payload type.
    #[error("wrong payload tag {0:#06x}")]
    WrongTag(u16),
    /// The lamp command byte matches no known command.
    #[error("unknown lamp command {0:#04x}")]
    UnknownCommand(u8),
}

/// Periodic environment report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub temperature_milli_celsius: i32,
    pub humidity_milli_percent: i32,
}

impl Report {
    pub const WIRE_SIZE: usize = 2 + 4 + 4;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut bytes = [0u8; Self::WIRE_SIZE];
        bytes[0..2].copy_from_slice(&TAG_REPORT.to_ne_bytes());
        bytes[2..6].copy_from_slice(&self.temperature_milli_celsius.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.humidity_milli_percent.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(PayloadError::Truncated);
        }
        let tag = u16::from_ne_bytes([bytes[0], bytes[1]]);
        if tag != TAG_REPORT {
            return Err(PayloadError::WrongTag(tag));
        }
        Ok(Self {
            temperature_milli_celsius: i32::from_le_bytes([
                bytes[2], bytes[3], bytes[4], bytes[5],
            ]),
            humidity_milli_percent: i32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        })
    }
}

/// What a switch asks a lamp to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampCommand {
    Off,
    On,
    Toggle,
}

impl LampCommand {
    fn to_byte(self) -> u8 {
        match self {
            LampCommand::Off => 0,
            LampCommand::On => 1,
            LampCommand::Toggle => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, PayloadError> {
        match byte {
            0 => Ok(LampCommand::Off),
            1 => Ok(LampCommand::On),
            2 => Ok(LampCommand::Toggle),
            other => Err(PayloadError::UnknownCommand(other)),
        }
    }
}

/// Lamp command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggle {
    pub command: LampCommand,
}

impl Toggle {
    pub const WIRE_SIZE: usize = 2 + 1;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut bytes = [0u8; Self::WIRE_SIZE];
        bytes[0..2].copy_from_slice(&TAG_TOGGLE.to_ne_bytes());
        bytes[2] = self.command.to_byte();
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(PayloadError::Truncated);
        }
        let tag = u16::from_ne_bytes([bytes[0], bytes[1]]);
        if tag != TAG_TOGGLE {
            return Err(PayloadError::WrongTag(tag));
        }
        Ok(Self {
            command: LampCommand::from_byte(bytes[2])?,
        })
    }
}

/// Lamp state payload, broadcast after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightStatus {
    pub on: bool,
}

impl LightStatus {
    pub const WIRE_SIZE: usize = 2 + 1;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut bytes = [0u8; Self::WIRE_SIZE];
        bytes[0..2].copy_from_slice(&TAG_LIGHT_STATUS.to_ne_bytes());
        bytes[2] = u8::from(self.on);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(PayloadError::Truncated);
        }
        let tag = u16::from_ne_bytes([bytes[0], bytes[1]]);
        if tag != TAG_LIGHT_STATUS {
            return Err(PayloadError::WrongTag(tag));
        }
        Ok(Self { on: bytes[2] != 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_sizes_are_fixed() {
        assert_eq!(Report::WIRE_SIZE, 10);
        assert_eq!(Toggle::WIRE_SIZE, 3);
        assert_eq!(LightStatus::WIRE_SIZE, 3);
    }

    #[test]
    fn reports_round_trip() {
        let report = Report {
            temperature_milli_celsius: 23_774,
            humidity_milli_percent: 45_818,
        };
        assert_eq!(Report::from_bytes(&report.to_bytes()), Ok(report));

        let negative = Report {
            temperature_milli_celsius: -40_000,
            humidity_milli_percent: 0,
        };
        assert_eq!(Report::from_bytes(&negative.to_bytes()), Ok(negative));
    }

    #[test]
    fn toggles_round_trip() {
        for command in [LampCommand::Off, LampCommand::On, LampCommand::Toggle] {
            let toggle = Toggle { command };
            assert_eq!(Toggle::from_bytes(&toggle.to_bytes()), Ok(toggle));
        }
    }

    #[test]
    fn light_status_round_trips() {
        for on in [false, true] {
            let status = LightStatus { on };
            assert_eq!(LightStatus::from_bytes(&status.to_bytes()), Ok(status));
        }
    }

    #[test]
    fn peeked_tags_match_the_encoders() {
        let report = Report {
            temperature_milli_celsius: 0,
            humidity_milli_percent: 0,
        };
        assert_eq!(peek_tag(&report.to_bytes()), Some(TAG_REPORT));

        let toggle = Toggle {
            command: LampCommand::Toggle,
        };
        assert_eq!(peek_tag(&toggle.to_bytes()), Some(TAG_TOGGLE));

        assert_eq!(peek_tag(&[0x01]), None);
        assert_eq!(peek_tag(&[]), None);
    }

    #[test]
    fn wrong_tags_are_rejected() {
        let toggle = Toggle {
            command: LampCommand::On,
        };
        assert_eq!(
            Report::from_bytes(&toggle.to_bytes()),
            Err(PayloadError::Truncated)
        );

        let mut bytes = toggle.to_bytes();
        bytes[0..2].copy_from_slice(&TAG_LIGHT_STATUS.to_ne_bytes());
        assert_eq!(
            Toggle::from_bytes(&bytes),
            Err(PayloadError::WrongTag(TAG_LIGHT_STATUS))
        );
    }

    #[test]
    fn unknown_lamp_commands_are_rejected() {
        let mut bytes = Toggle {
            command: LampCommand::Off,
        }
        .to_bytes();
        bytes[2] = 9;
        assert_eq!(
            Toggle::from_bytes(&bytes),
            Err(PayloadError::UnknownCommand(9))
        );
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let report = Report {
            temperature_milli_celsius: 1,
            humidity_milli_percent: 2,
        };
        let bytes = report.to_bytes();
        assert_eq!(
            Report::from_bytes(&bytes[..Report::WIRE_SIZE - 1]),
            Err(PayloadError::Truncated)
        );
    }
}
