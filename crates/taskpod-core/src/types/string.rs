use serde::{Deserialize, Serialize};

use super::{
    PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValidationCode, ValueType,
};
use crate::Charset;

/// Free text with optional length bounds, counted in characters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl Type for StringType {
    fn value_type(&self) -> ValueType {
        ValueType::String
    }

    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError> {
        raw.text(charset)
            .map(|text| TypedValue::String(text.into_owned()))
            .ok_or_else(|| TypeValidationError::mismatch("a string", raw.describe()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::String(text) = value else {
            return Err(TypeValidationError::mismatch("a string", value.value_type()));
        };
        let length = text.chars().count();
        if let Some(min) = self.min_length.filter(|min| length < *min) {
            return Err(TypeValidationError::new(
                ValidationCode::MinLength,
                format!("length {length} is below the minimum of {min}"),
            ));
        }
        if let Some(max) = self.max_length.filter(|max| length > *max) {
            return Err(TypeValidationError::new(
                ValidationCode::MaxLength,
                format!("length {length} exceeds the maximum of {max}"),
            ));
        }
        Ok(())
    }

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue {
        match value {
            TypedValue::String(text) => PersistedValue::Text(text.clone()),
            _ => PersistedValue::InStorage,
        }
    }
}
