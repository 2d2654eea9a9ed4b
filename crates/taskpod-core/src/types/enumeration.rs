use serde::{Deserialize, Serialize};

use super::{
    PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValidationCode, ValueType,
};
use crate::{Charset, CoreError};

/// Longest allowed enumeration value, in characters.
pub const MAX_ENUMERATION_VALUE_LENGTH: usize = 256;

/// One of a declared set of single-line values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationType {
    #[serde(default)]
    pub values: Vec<String>,
}

impl EnumerationType {
    /// Declare the allowed values. Each one must itself be a valid value.
    pub fn new(values: Vec<String>) -> Result<Self, CoreError> {
        for value in &values {
            shape(value).map_err(|e| CoreError::InvalidInput(e.message))?;
        }
        Ok(Self { values })
    }
}

fn shape(value: &str) -> Result<(), TypeValidationError> {
    if value.contains(['\n', '\r']) {
        return Err(TypeValidationError::new(
            ValidationCode::LineBreak,
            "enumeration value contains a line break",
        ));
    }
    let length = value.chars().count();
    if length > MAX_ENUMERATION_VALUE_LENGTH {
        return Err(TypeValidationError::new(
            ValidationCode::TooLong,
            format!(
                "enumeration value is {length} characters, limit is {MAX_ENUMERATION_VALUE_LENGTH}"
            ),
        ));
    }
    Ok(())
}

impl Type for EnumerationType {
    fn value_type(&self) -> ValueType {
        ValueType::Enumeration
    }

    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError> {
        raw.text(charset)
            .map(|text| TypedValue::Enumeration(text.into_owned()))
            .ok_or_else(|| TypeValidationError::mismatch("a string", raw.describe()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::Enumeration(text) = value else {
            return Err(TypeValidationError::mismatch("an enumeration value", value.value_type()));
        };
        shape(text)?;
        if !self.values.iter().any(|allowed| allowed == text) {
            return Err(TypeValidationError::new(
                ValidationCode::NotAllowed,
                format!("'{text}' is not one of {:?}", self.values),
            ));
        }
        Ok(())
    }

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue {
        match value {
            TypedValue::Enumeration(text) => PersistedValue::Text(text.clone()),
            _ => PersistedValue::InStorage,
        }
    }
}
