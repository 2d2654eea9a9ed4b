use serde::{Deserialize, Serialize};

use super::{
    PersistedValue, RawValue, Type, TypeValidationError, TypedValue, ValidationCode, ValueType,
};
use crate::Charset;

/// A GeoJSON object, given inline or as JSON text. No constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryType {}

fn is_geojson(value: &serde_json::Value) -> bool {
    value.get("type").is_some_and(serde_json::Value::is_string)
}

impl Type for GeometryType {
    fn value_type(&self) -> ValueType {
        ValueType::Geometry
    }

    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError> {
        let object = match raw {
            RawValue::Json(object @ serde_json::Value::Object(_)) => object.clone(),
            RawValue::Json(serde_json::Value::String(_)) | RawValue::Text(_) | RawValue::Binary(_) => {
                let text = raw.text(charset).unwrap_or_default();
                serde_json::from_str(&text).map_err(|e| {
                    TypeValidationError::new(
                        ValidationCode::FormatMismatch,
                        format!("geometry is not valid JSON: {e}"),
                    )
                })?
            }
            RawValue::Json(other) => {
                return Err(TypeValidationError::mismatch("a GeoJSON object", other))
            }
        };
        if !is_geojson(&object) {
            return Err(TypeValidationError::new(
                ValidationCode::FormatMismatch,
                "geometry is not a GeoJSON object",
            ));
        }
        Ok(TypedValue::Geometry(object.to_string()))
    }

    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError> {
        match value {
            TypedValue::Geometry(_) => Ok(()),
            other => Err(TypeValidationError::mismatch("a geometry", other.value_type())),
        }
    }

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue {
        match value {
            TypedValue::Geometry(text) => PersistedValue::Text(text.clone()),
            _ => PersistedValue::InStorage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inline_and_text_forms_agree() {
        let t = GeometryType::default();
        let inline = t
            .parse(
                &RawValue::Json(json!({ "type": "Point", "coordinates": [1, 2] })),
                Charset::Utf8,
            )
            .unwrap();
        let text = t
            .parse(
                &RawValue::Binary(br#"{"type":"Point","coordinates":[1,2]}"#.to_vec()),
                Charset::Utf8,
            )
            .unwrap();
        assert_eq!(inline, text);
    }

    #[test]
    fn test_rejects_non_geojson() {
        let t = GeometryType::default();
        let err = t
            .parse(&RawValue::Text("POINT (1 2)".to_string()), Charset::Utf8)
            .unwrap_err();
        assert_eq!(err.code, ValidationCode::FormatMismatch);
        let err = t.parse(&RawValue::Json(json!({ "x": 1 })), Charset::Utf8).unwrap_err();
        assert_eq!(err.code, ValidationCode::FormatMismatch);
        let err = t.parse(&RawValue::Json(json!(4)), Charset::Utf8).unwrap_err();
        assert_eq!(err.code, ValidationCode::TypeMismatch);
    }
}
