use serde::{Deserialize, Serialize};

use super::binary::BinaryLimits;
use super::{PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValueType};
use crate::formats::FileFormat;
use crate::Charset;

/// A raster image. The content must sniff as PNG, JPEG or TIFF unless other
/// formats are declared. The bytes are persisted with the row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageType {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
}

impl Type for ImageType {
    fn value_type(&self) -> ValueType {
        ValueType::Image
    }

    fn parse(&self, raw: &RawValue, _charset: Charset) -> Result<TypedValue, TypeValidationError> {
        Ok(TypedValue::Image(raw.bytes()?.into_owned()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::Image(bytes) = value else {
            return Err(TypeValidationError::mismatch("an image", value.value_type()));
        };
        BinaryLimits {
            formats: &self.formats,
            fallback: &FileFormat::IMAGE_DEFAULTS,
            max_file_size: self.max_file_size,
            max_width: self.max_width,
            max_height: self.max_height,
        }
        .check(bytes)
    }

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue {
        match value {
            TypedValue::Image(bytes) => PersistedValue::Blob(bytes.clone()),
            _ => PersistedValue::InStorage,
        }
    }
}
