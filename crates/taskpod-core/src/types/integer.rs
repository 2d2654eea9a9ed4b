use serde::{Deserialize, Serialize};

use super::{
    PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValidationCode, ValueType,
};
use crate::Charset;

/// Signed 64-bit integer with optional strict (`gt`, `lt`) and inclusive
/// (`geq`, `leq`) bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leq: Option<i64>,
}

impl Type for IntegerType {
    fn value_type(&self) -> ValueType {
        ValueType::Integer
    }

    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError> {
        let parsed = match raw {
            RawValue::Json(serde_json::Value::Number(n)) => n.as_i64(),
            RawValue::Json(_) => None,
            _ => raw.text(charset).and_then(|text| text.parse().ok()),
        };
        parsed
            .map(TypedValue::Integer)
            .ok_or_else(|| TypeValidationError::mismatch("an integer", raw.describe()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::Integer(v) = *value else {
            return Err(TypeValidationError::mismatch("an integer", value.value_type()));
        };
        if let Some(gt) = self.gt.filter(|gt| v <= *gt) {
            return Err(TypeValidationError::new(
                ValidationCode::Gt,
                format!("{v} must be greater than {gt}"),
            ));
        }
        if let Some(geq) = self.geq.filter(|geq| v < *geq) {
            return Err(TypeValidationError::new(
                ValidationCode::Geq,
                format!("{v} must be greater than or equal to {geq}"),
            ));
        }
        if let Some(lt) = self.lt.filter(|lt| v >= *lt) {
            return Err(TypeValidationError::new(
                ValidationCode::Lt,
                format!("{v} must be lower than {lt}"),
            ));
        }
        if let Some(leq) = self.leq.filter(|leq| v > *leq) {
            return Err(TypeValidationError::new(
                ValidationCode::Leq,
                format!("{v} must be lower than or equal to {leq}"),
            ));
        }
        Ok(())
    }

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue {
        match value {
            TypedValue::Integer(v) => PersistedValue::Integer(*v),
            _ => PersistedValue::InStorage,
        }
    }
}
