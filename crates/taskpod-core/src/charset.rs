//! Text encodings used to store textual parameter values.

use serde::{Deserialize, Serialize};

/// Charset applied to textual parameter values on their way to and from storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    UsAscii,
    Iso8859_1,
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    /// Big-endian with a byte order mark on encode; BOM-sniffed on decode.
    Utf16,
}

impl Charset {
    /// Resolve a configured charset name. Unknown names fall back to UTF-8.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "US_ASCII" => Self::UsAscii,
            "ISO_8859_1" => Self::Iso8859_1,
            "UTF_16LE" => Self::Utf16Le,
            "UTF_16BE" => Self::Utf16Be,
            "UTF_16" => Self::Utf16,
            _ => Self::Utf8,
        }
    }

    /// Configuration name of this charset.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UsAscii => "US_ASCII",
            Self::Iso8859_1 => "ISO_8859_1",
            Self::Utf8 => "UTF_8",
            Self::Utf16Le => "UTF_16LE",
            Self::Utf16Be => "UTF_16BE",
            Self::Utf16 => "UTF_16",
        }
    }

    /// Encode text. Characters the charset cannot represent become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::UsAscii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Self::Iso8859_1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Self::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Self::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            Self::Utf16 => {
                let mut bytes = vec![0xFE, 0xFF];
                bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                bytes
            }
        }
    }

    /// Decode bytes. Invalid sequences are replaced rather than rejected.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::UsAscii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
            Self::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            Self::Utf16 => match bytes {
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                _ => decode_utf16(bytes, u16::from_be_bytes),
            },
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
