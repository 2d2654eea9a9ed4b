use serde::{Deserialize, Serialize};

use super::binary::BinaryLimits;
use super::{PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValueType};
use crate::formats::FileFormat;
use crate::Charset;

/// A whole-slide image (pyramidal TIFF or DICOM). Kept only in storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsiType {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
}

impl Type for WsiType {
    fn value_type(&self) -> ValueType {
        ValueType::Wsi
    }

    fn parse(&self, raw: &RawValue, _charset: Charset) -> Result<TypedValue, TypeValidationError> {
        Ok(TypedValue::Wsi(raw.bytes()?.into_owned()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::Wsi(bytes) = value else {
            return Err(TypeValidationError::mismatch("a whole-slide image", value.value_type()));
        };
        BinaryLimits {
            formats: &self.formats,
            fallback: &FileFormat::WSI_DEFAULTS,
            max_file_size: self.max_file_size,
            max_width: self.max_width,
            max_height: self.max_height,
        }
        .check(bytes)
    }

    fn persisted_value(&self, _value: &TypedValue) -> PersistedValue {
        PersistedValue::InStorage
    }
}
