//! Wire format of the key exchange frames.
//!
//! Both frames start with a 16-bit state word followed by length-prefixed
//! fields. Numbers are native-endian: the two ends of an exchange run the
//! same firmware on the same architecture, and the frames never outlive one
//! handshake. The length prefixes are `usize`-wide, so the encoded size
//! differs between 32-bit and 64-bit builds; [`MAX_MESSAGE_SIZE`] tracks
//! whichever is being compiled.
//!
//! A decoder ignores trailing bytes, which lets a radio pad frames, but any
//! length prefix other than the fixed field size is rejected outright.

use core::mem::size_of;

use thiserror_no_std::Error;

/// State word of a key request frame.
pub const STATE_REQUEST_KEY: u16 = 0x0001;
/// State word of a key delivery frame.
pub const STATE_SEND_KEY: u16 = 0x0002;

/// SEC1 uncompressed P-256 point.
pub const PUBLIC_KEY_SIZE: usize = 65;
/// AES-CTR initialization vector.
pub const IV_SIZE: usize = 16;
/// The wrapped network key; CTR mode keeps the plaintext length.
pub const ENCRYPTED_KEY_SIZE: usize = 16;

const STATE_SIZE: usize = size_of::<u16>();
const LENGTH_SIZE: usize = size_of::<usize>();

/// Encoded size of a key request frame.
pub const REQUEST_KEY_WIRE_SIZE: usize = STATE_SIZE + LENGTH_SIZE + PUBLIC_KEY_SIZE;
/// Encoded size of a key delivery frame.
pub const SEND_KEY_WIRE_SIZE: usize = REQUEST_KEY_WIRE_SIZE
    + LENGTH_SIZE
    + IV_SIZE
    + LENGTH_SIZE
    + ENCRYPTED_KEY_SIZE;
/// Largest frame the exchange ever produces.
pub const MAX_MESSAGE_SIZE: usize = SEND_KEY_WIRE_SIZE;

/// Errors from encoding or decoding an exchange frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// The output buffer cannot hold the encoded frame.
    #[error("output buffer too small")]
    BufferTooSmall,
    /// The input ended before the frame was complete.
    #[error("frame truncated")]
    Truncated,
    /// The state word matches no known frame.
    #[error("unknown state word {0:#06x}")]
    UnknownState(u16),
    /// A length prefix disagrees with the fixed field size.
    #[error("bad {field} length {length}")]
    BadLength {
        field: &'static str,
        length: usize,
    },
}

/// One frame of the key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMessage {
    /// A joining node announces its ephemeral public key.
    RequestKey {
        public_key: [u8; PUBLIC_KEY_SIZE],
    },
    /// The sink returns its own ephemeral public key plus the network key
    /// encrypted under the agreed wrap key.
    SendKey {
        public_key: [u8; PUBLIC_KEY_SIZE],
        iv: [u8; IV_SIZE],
        encrypted_key: [u8; ENCRYPTED_KEY_SIZE],
    },
}

impl ExchangeMessage {
    /// Size of this frame on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            ExchangeMessage::RequestKey { .. } => REQUEST_KEY_WIRE_SIZE,
            ExchangeMessage::SendKey { .. } => SEND_KEY_WIRE_SIZE,
        }
    }

    /// Encode into `buffer`, returning the number of bytes written.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, MessageError> {
        if buffer.len() < self.encoded_len() {
            return Err(MessageError::BufferTooSmall);
        }

        let mut offset = 0;
        match self {
            ExchangeMessage::RequestKey { public_key } => {
                put_u16(buffer, &mut offset, STATE_REQUEST_KEY);
                put_field(buffer, &mut offset, public_key);
            }
            ExchangeMessage::SendKey {
                public_key,
                iv,
                encrypted_key,
            } => {
                put_u16(buffer, &mut offset, STATE_SEND_KEY);
                put_field(buffer, &mut offset, public_key);
                put_field(buffer, &mut offset, iv);
                put_field(buffer, &mut offset, encrypted_key);
            }
        }
        Ok(offset)
    }

    /// Decode a frame from the start of `bytes`. Trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut offset = 0;
        let state = take_u16(bytes, &mut offset)?;
        match state {
            STATE_REQUEST_KEY => Ok(ExchangeMessage::RequestKey {
                public_key: take_field(bytes, &mut offset, "public_key")?,
            }),
            STATE_SEND_KEY => Ok(ExchangeMessage::SendKey {
                public_key: take_field(bytes, &mut offset, "public_key")?,
                iv: take_field(bytes, &mut offset, "iv")?,
                encrypted_key: take_field(bytes, &mut offset, "encrypted_key")?,
            }),
            other => Err(MessageError::UnknownState(other)),
        }
    }
}

fn put_u16(buffer: &mut [u8], offset: &mut usize, value: u16) {
    buffer[*offset..*offset + STATE_SIZE].copy_from_slice(&value.to_ne_bytes());
    *offset += STATE_SIZE;
}

/// Length prefix, then the field bytes.
fn put_field(buffer: &mut [u8], offset: &mut usize, field: &[u8]) {
    buffer[*offset..*offset + LENGTH_SIZE].copy_from_slice(&field.len().to_ne_bytes());
    *offset += LENGTH_SIZE;
    buffer[*offset..*offset + field.len()].copy_from_slice(field);
    *offset += field.len();
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, length: usize) -> Result<&'a [u8], MessageError> {
    let end = offset.checked_add(length).ok_or(MessageError::Truncated)?;
    let slice = bytes.get(*offset..end).ok_or(MessageError::Truncated)?;
    *offset = end;
    Ok(slice)
}

fn take_u16(bytes: &[u8], offset: &mut usize) -> Result<u16, MessageError> {
    let mut raw = [0u8; STATE_SIZE];
    raw.copy_from_slice(take(bytes, offset, STATE_SIZE)?);
    Ok(u16::from_ne_bytes(raw))
}

/// Length-prefixed fixed-size field. The prefix must match `N` exactly.
fn take_field<const N: usize>(
    bytes: &[u8],
    offset: &mut usize,
    field: &'static str,
) -> Result<[u8; N], MessageError> {
    let mut raw = [0u8; LENGTH_SIZE];
    raw.copy_from_slice(take(bytes, offset, LENGTH_SIZE)?);
    let length = usize::from_ne_bytes(raw);
    if length != N {
        return Err(MessageError::BadLength { field, length });
    }

    let mut value = [0u8; N];
    value.copy_from_slice(take(bytes, offset, N)?);
    Ok(value)
}
