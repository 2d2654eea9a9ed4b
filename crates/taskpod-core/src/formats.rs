//! Signature sniffing for binary parameter payloads.

use serde::{Deserialize, Serialize};

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: [u8; 3] = [0xFF, 0xD8, 0xFF];
const TIFF_LE_SIGNATURE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00];
const TIFF_BE_SIGNATURE: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A];
const DICOM_MAGIC: [u8; 4] = *b"DICM";
const DICOM_PREAMBLE: usize = 128;

/// A binary format TaskPod can recognise from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    Png,
    Jpeg,
    Tiff,
    Dicom,
}

impl FileFormat {
    /// Formats an image parameter accepts when it declares none.
    pub const IMAGE_DEFAULTS: [FileFormat; 3] = [Self::Jpeg, Self::Png, Self::Tiff];

    /// Formats a whole-slide image parameter accepts when it declares none.
    pub const WSI_DEFAULTS: [FileFormat; 2] = [Self::Tiff, Self::Dicom];

    /// Resolve a declared format name or media type.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PNG" | "IMAGE/PNG" => Some(Self::Png),
            "JPEG" | "JPG" | "IMAGE/JPEG" => Some(Self::Jpeg),
            "TIFF" | "TIF" | "IMAGE/TIFF" => Some(Self::Tiff),
            "DICOM" | "DCM" | "APPLICATION/DICOM" => Some(Self::Dicom),
            _ => None,
        }
    }

    /// Detect the format of `bytes`, if any.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        [Self::Png, Self::Jpeg, Self::Tiff, Self::Dicom]
            .into_iter()
            .find(|format| format.check_signature(bytes))
    }

    /// Returns true if `bytes` start with this format's signature.
    pub fn check_signature(&self, bytes: &[u8]) -> bool {
        match self {
            Self::Png => bytes.starts_with(&PNG_SIGNATURE),
            Self::Jpeg => bytes.starts_with(&JPEG_SIGNATURE),
            Self::Tiff => {
                bytes.starts_with(&TIFF_LE_SIGNATURE) || bytes.starts_with(&TIFF_BE_SIGNATURE)
            }
            Self::Dicom => {
                bytes.starts_with(&DICOM_MAGIC)
                    || bytes
                        .get(DICOM_PREAMBLE..DICOM_PREAMBLE + DICOM_MAGIC.len())
                        .is_some_and(|magic| magic == DICOM_MAGIC)
            }
        }
    }

    /// Width and height in pixels, when the header exposes them.
    pub fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        match self {
            Self::Png => png_dimensions(bytes),
            Self::Jpeg => jpeg_dimensions(bytes),
            Self::Tiff => tiff_dimensions(bytes),
            Self::Dicom => None,
        }
    }
}

fn read_u16(bytes: &[u8], offset: usize, little_endian: bool) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(if little_endian {
        u16::from_le_bytes(raw)
    } else {
        u16::from_be_bytes(raw)
    })
}

fn read_u32(bytes: &[u8], offset: usize, little_endian: bool) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(if little_endian {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    })
}

/// IHDR is always the first chunk: length(4) "IHDR"(4) width(4) height(4).
fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.get(12..16)? != b"IHDR" {
        return None;
    }
    Some((read_u32(bytes, 16, false)?, read_u32(bytes, 20, false)?))
}

/// Walk the marker segments up to the first start-of-frame.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut offset = 2;
    loop {
        if *bytes.get(offset)? != 0xFF {
            return None;
        }
        let marker = *bytes.get(offset + 1)?;
        match marker {
            // Fill bytes.
            0xFF => offset += 1,
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD9 => offset += 2,
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let height = read_u16(bytes, offset + 5, false)?;
                let width = read_u16(bytes, offset + 7, false)?;
                return Some((u32::from(width), u32::from(height)));
            }
            _ => {
                let length = read_u16(bytes, offset + 2, false)?;
                offset += 2 + usize::from(length);
            }
        }
    }
}

/// Read ImageWidth (256) and ImageLength (257) from the first IFD.
fn tiff_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let little_endian = bytes.starts_with(&TIFF_LE_SIGNATURE);
    let ifd = usize::try_from(read_u32(bytes, 4, little_endian)?).ok()?;
    let count = usize::from(read_u16(bytes, ifd, little_endian)?);

    let mut width = None;
    let mut height = None;
    for index in 0..count {
        let entry = ifd + 2 + index * 12;
        let tag = read_u16(bytes, entry, little_endian)?;
        let field_type = read_u16(bytes, entry + 2, little_endian)?;
        let value = match field_type {
            3 => u32::from(read_u16(bytes, entry + 8, little_endian)?),
            4 => read_u32(bytes, entry + 8, little_endian)?,
            _ => continue,
        };
        match tag {
            256 => width = Some(value),
            257 => height = Some(value),
            _ => {}
        }
    }
    Some((width?, height?))
}
