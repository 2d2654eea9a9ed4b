use serde::{Deserialize, Serialize};

use super::binary::BinaryLimits;
use super::{PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValueType};
use crate::Charset;

/// Opaque bytes, stored as-is. Only the storage keeps the content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
}

impl Type for FileType {
    fn value_type(&self) -> ValueType {
        ValueType::File
    }

    fn parse(&self, raw: &RawValue, _charset: Charset) -> Result<TypedValue, TypeValidationError> {
        Ok(TypedValue::File(raw.bytes()?.into_owned()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::File(bytes) = value else {
            return Err(TypeValidationError::mismatch("a file", value.value_type()));
        };
        BinaryLimits {
            formats: &self.formats,
            fallback: &[],
            max_file_size: self.max_file_size,
            max_width: None,
            max_height: None,
        }
        .check(bytes)
    }

    fn persisted_value(&self, _value: &TypedValue) -> PersistedValue {
        PersistedValue::InStorage
    }
}
