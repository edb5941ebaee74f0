//! Typed interpretation of raw SDO payloads for display and logging.
//!
//! SDO transfers move raw bytes; the object's declared data type decides how
//! they read. Values that don't fit their type fall back to a hex dump.

use std::fmt;

use crate::datatype;

/// A decoded SDO value
#[derive(Debug, Clone, PartialEq)]
pub enum SdoValue {
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl SdoValue {
    /// Decode `payload` as the given CANopen data type (little endian).
    pub fn decode(data_type: Option<u16>, payload: &[u8]) -> Self {
        let Some(code) = data_type else {
            return Self::Bytes(payload.to_vec());
        };

        match code {
            0x01 if payload.len() == 1 => Self::Boolean(payload[0] != 0),
            0x09 => Self::String(
                String::from_utf8_lossy(payload).trim_end_matches('\0').to_string(),
            ),
            0x08 if payload.len() == 4 => {
                Self::Real(f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as f64)
            }
            0x11 if payload.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(payload);
                Self::Real(f64::from_le_bytes(raw))
            }
            _ => match datatype::fixed_size(code) {
                Some(size) if size == payload.len() && !datatype::is_real(code) => {
                    if datatype::is_signed_integer(code) {
                        Self::Signed(sign_extend(payload))
                    } else {
                        Self::Unsigned(unsigned(payload))
                    }
                }
                _ => Self::Bytes(payload.to_vec()),
            },
        }
    }
}

fn unsigned(payload: &[u8]) -> u64 {
    payload
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | *byte as u64)
}

fn sign_extend(payload: &[u8]) -> i64 {
    let bits = payload.len() * 8;
    let value = unsigned(payload);
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

impl fmt::Display for SdoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Signed(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{:02X?}", v),
        }
    }
}
