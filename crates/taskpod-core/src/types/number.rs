use serde::{Deserialize, Serialize};

use super::{
    PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValidationCode, ValueType,
};
use crate::Charset;

/// 64-bit float. NaN and infinities are rejected unless allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leq: Option<f64>,
    #[serde(default)]
    pub infinity_allowed: bool,
    #[serde(default)]
    pub nan_allowed: bool,
}

/// Text form of a number. JSON has no literal for the non-finite values.
pub(super) fn format(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

fn parse_special(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

impl Type for NumberType {
    fn value_type(&self) -> ValueType {
        ValueType::Number
    }

    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError> {
        let parsed = match raw {
            RawValue::Json(serde_json::Value::Number(n)) => n.as_f64(),
            RawValue::Json(serde_json::Value::String(s)) => parse_special(s.trim()),
            RawValue::Json(_) => None,
            _ => raw.text(charset).and_then(|text| {
                parse_special(&text).or_else(|| text.parse::<f64>().ok())
            }),
        };
        parsed
            .map(TypedValue::Number)
            .ok_or_else(|| TypeValidationError::mismatch("a number", raw.describe()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        let TypedValue::Number(v) = *value else {
            return Err(TypeValidationError::mismatch("a number", value.value_type()));
        };
        if v.is_nan() {
            if self.nan_allowed {
                return Ok(());
            }
            return Err(TypeValidationError::new(
                ValidationCode::NanNotAllowed,
                "NaN is not allowed",
            ));
        }
        if v.is_infinite() && !self.infinity_allowed {
            return Err(TypeValidationError::new(
                ValidationCode::InfinityNotAllowed,
                format!("{} is not allowed", format(v)),
            ));
        }
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
            TypedValue::Number(v) => PersistedValue::Number(*v),
            _ => PersistedValue::InStorage,
        }
    }
}
