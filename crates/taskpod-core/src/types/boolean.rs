use serde::{Deserialize, Serialize};

use super::{PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValueType};
use crate::Charset;

/// `true` or `false`. No constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanType {}

impl Type for BooleanType {
    fn value_type(&self) -> ValueType {
        ValueType::Boolean
    }

    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError> {
        let text = match raw {
            RawValue::Json(serde_json::Value::Bool(v)) => return Ok(TypedValue::Boolean(*v)),
            RawValue::Json(_) => None,
            _ => raw.text(charset),
        };
        match text.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("true") => Ok(TypedValue::Boolean(true)),
            Some(t) if t.eq_ignore_ascii_case("false") => Ok(TypedValue::Boolean(false)),
            _ => Err(TypeValidationError::mismatch("a boolean", raw.describe())),
        }
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        match value {
            TypedValue::Boolean(_) => Ok(()),
            other => Err(TypeValidationError::mismatch("a boolean", other.value_type())),
        }
    }

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue {
        match value {
            TypedValue::Boolean(v) => PersistedValue::Boolean(*v),
            _ => PersistedValue::InStorage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_and_text_booleans() {
        let t = BooleanType::default();
        assert_eq!(
            t.parse(&RawValue::Json(json!(true)), Charset::Utf8),
            Ok(TypedValue::Boolean(true))
        );
        assert_eq!(
            t.parse(&RawValue::Binary(b" False\n".to_vec()), Charset::Utf8),
            Ok(TypedValue::Boolean(false))
        );
    }

    #[test]
    fn test_json_string_is_a_mismatch() {
        let err = BooleanType::default()
            .parse(&RawValue::Json(json!("true")), Charset::Utf8)
            .unwrap_err();
        assert_eq!(err.code, crate::types::ValidationCode::TypeMismatch);
    }
}
