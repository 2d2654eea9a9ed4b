//! Parameter type system.
//!
//! Every declared input or output carries one [`ParameterType`]. The variant
//! owns the rules for its value kind: how a raw payload is parsed, which
//! constraints apply, how the value is encoded into storage and how it is
//! persisted and rendered back. Callers only go through the methods on
//! [`ParameterType`]; nothing outside this module matches on the variant.

mod binary;
mod boolean;
mod enumeration;
mod file;
mod geometry;
mod image;
mod integer;
mod number;
mod string;
mod wsi;

use std::borrow::Cow;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::{Charset, ParameterDirection, RunId, StorageData};

pub use boolean::BooleanType;
pub use enumeration::{EnumerationType, MAX_ENUMERATION_VALUE_LENGTH};
pub use file::FileType;
pub use geometry::GeometryType;
pub use image::ImageType;
pub use integer::IntegerType;
pub use number::NumberType;
pub use string::StringType;
pub use wsi::WsiType;

/// Value-kind tag shown on rendered parameter values and persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Boolean,
    Integer,
    Number,
    String,
    Enumeration,
    Geometry,
    Image,
    Wsi,
    File,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Number => "NUMBER",
            Self::String => "STRING",
            Self::Enumeration => "ENUMERATION",
            Self::Geometry => "GEOMETRY",
            Self::Image => "IMAGE",
            Self::Wsi => "WSI",
            Self::File => "FILE",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload as it arrived, before any type has looked at it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// A JSON value from a provision body.
    Json(serde_json::Value),
    /// Text read back from storage or an archive, already decoded.
    Text(String),
    /// Raw bytes from an upload or an archive entry.
    Binary(Vec<u8>),
}

impl RawValue {
    /// Returns true for an explicit JSON `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Json(serde_json::Value::Null))
    }

    /// Short description for mismatch messages.
    fn describe(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => format!("{text:?}"),
            Self::Binary(bytes) => format!("{} bytes", bytes.len()),
        }
    }

    /// Textual view of the payload. Bytes are decoded with `charset` and trimmed.
    fn text(&self, charset: Charset) -> Option<Cow<'_, str>> {
        match self {
            Self::Json(serde_json::Value::String(s)) => Some(Cow::Borrowed(s)),
            Self::Json(_) => None,
            Self::Text(s) => Some(Cow::Borrowed(s.trim())),
            Self::Binary(bytes) => Some(Cow::Owned(charset.decode(bytes).trim().to_string())),
        }
    }

    /// Byte view of the payload. JSON strings are base64.
    fn bytes(&self) -> Result<Cow<'_, [u8]>, TypeValidationError> {
        match self {
            Self::Binary(bytes) => Ok(Cow::Borrowed(bytes)),
            Self::Text(s) => Ok(Cow::Borrowed(s.as_bytes())),
            Self::Json(serde_json::Value::String(s)) => BASE64
                .decode(s.trim())
                .map(Cow::Owned)
                .map_err(|e| {
                    TypeValidationError::new(
                        ValidationCode::FormatMismatch,
                        format!("value is not valid base64: {e}"),
                    )
                }),
            Self::Json(other) => Err(TypeValidationError::mismatch("binary content", other)),
        }
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// One value supplied for a named parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireProvision")]
pub struct Provision {
    pub parameter_name: String,
    pub value: RawValue,
}

impl Provision {
    pub fn new(parameter_name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            value: value.into(),
        }
    }
}

#[derive(Deserialize)]
struct WireProvision {
    param_name: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl From<WireProvision> for Provision {
    fn from(wire: WireProvision) -> Self {
        Self::new(wire.param_name, wire.value)
    }
}

/// A parsed value that satisfied its type's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Enumeration(String),
    /// GeoJSON text.
    Geometry(String),
    Image(Vec<u8>),
    Wsi(Vec<u8>),
    File(Vec<u8>),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Boolean(_) => ValueType::Boolean,
            Self::Integer(_) => ValueType::Integer,
            Self::Number(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::Enumeration(_) => ValueType::Enumeration,
            Self::Geometry(_) => ValueType::Geometry,
            Self::Image(_) => ValueType::Image,
            Self::Wsi(_) => ValueType::Wsi,
            Self::File(_) => ValueType::File,
        }
    }

    /// Canonical storage encoding. Text kinds go through `charset`.
    pub fn encode(&self, charset: Charset) -> Vec<u8> {
        match self {
            Self::Boolean(v) => charset.encode(if *v { "true" } else { "false" }),
            Self::Integer(v) => charset.encode(&v.to_string()),
            Self::Number(v) => charset.encode(&number::format(*v)),
            Self::String(s) | Self::Enumeration(s) | Self::Geometry(s) => charset.encode(s),
            Self::Image(bytes) | Self::Wsi(bytes) | Self::File(bytes) => bytes.clone(),
        }
    }
}

/// Value column of a persisted parameter row, also the rendered value.
///
/// Serialized untagged: scalars as JSON scalars, blobs as base64 and values
/// kept only in storage as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PersistedValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Blob(#[serde(serialize_with = "serialize_base64")] Vec<u8>),
    InStorage,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}

/// Outward-facing rendering of one parameter value of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterValue {
    #[serde(rename = "param_name")]
    pub parameter_name: String,
    pub task_run_id: RunId,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: PersistedValue,
}

/// Persisted row for one (run, parameter, direction).
#[derive(Debug, Clone, PartialEq)]
pub struct TypePersistence {
    pub run_id: RunId,
    pub parameter_name: String,
    pub direction: ParameterDirection,
    pub value_type: ValueType,
    pub value: PersistedValue,
    pub updated_at: DateTime<Utc>,
}

/// Which rule a value broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Gt,
    Geq,
    Lt,
    Leq,
    TypeMismatch,
    FormatMismatch,
    ParameterNotFound,
    LineBreak,
    TooLong,
    NotAllowed,
    MinLength,
    MaxLength,
    InfinityNotAllowed,
    NanNotAllowed,
    FileTooLarge,
    DimensionsTooLarge,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Geq => "geq",
            Self::Lt => "lt",
            Self::Leq => "leq",
            Self::TypeMismatch => "type-mismatch",
            Self::FormatMismatch => "format-mismatch",
            Self::ParameterNotFound => "not-found",
            Self::LineBreak => "line-break",
            Self::TooLong => "too-long",
            Self::NotAllowed => "not-allowed",
            Self::MinLength => "min-length",
            Self::MaxLength => "max-length",
            Self::InfinityNotAllowed => "infinity",
            Self::NanNotAllowed => "nan",
            Self::FileTooLarge => "file-size",
            Self::DimensionsTooLarge => "dimensions",
        }
    }
}

/// A value rejected by its parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TypeValidationError {
    pub code: ValidationCode,
    pub message: String,
}

impl TypeValidationError {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn mismatch(expected: &str, got: impl fmt::Display) -> Self {
        Self::new(
            ValidationCode::TypeMismatch,
            format!("expected {expected}, got {got}"),
        )
    }
}

/// Per-kind behaviour shared by every variant.
trait Type {
    fn value_type(&self) -> ValueType;

    /// Shape check: turn a raw payload into a value of this kind.
    fn parse(&self, raw: &RawValue, charset: Charset) -> Result<TypedValue, TypeValidationError>;

    /// Constraint check on an already-parsed value.
    fn check(&self, value: &TypedValue) -> Result<(), TypeValidationError>;

    fn persisted_value(&self, value: &TypedValue) -> PersistedValue;
}

/// The declared type of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum ParameterType {
    Boolean(BooleanType),
    Integer(IntegerType),
    Number(NumberType),
    String(StringType),
    Enumeration(EnumerationType),
    Geometry(GeometryType),
    Image(ImageType),
    Wsi(WsiType),
    File(FileType),
}

impl ParameterType {
    fn as_type(&self) -> &dyn Type {
        match self {
            Self::Boolean(t) => t,
            Self::Integer(t) => t,
            Self::Number(t) => t,
            Self::String(t) => t,
            Self::Enumeration(t) => t,
            Self::Geometry(t) => t,
            Self::Image(t) => t,
            Self::Wsi(t) => t,
            Self::File(t) => t,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.as_type().value_type()
    }

    /// Returns true for kinds whose payload is opaque bytes.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Image(_) | Self::Wsi(_) | Self::File(_))
    }

    /// Parse and check `raw`. An absent or `null` value is accepted as `None`.
    pub fn validate(
        &self,
        raw: Option<&RawValue>,
        charset: Charset,
    ) -> Result<Option<TypedValue>, TypeValidationError> {
        let Some(raw) = raw.filter(|raw| !raw.is_null()) else {
            return Ok(None);
        };
        let typed = self.as_type().parse(raw, charset)?;
        self.as_type().check(&typed)?;
        Ok(Some(typed))
    }

    /// A storage tree with one FILE root named after the parameter.
    pub fn map_to_storage_file_data(
        &self,
        parameter_name: &str,
        value: &TypedValue,
        charset: Charset,
    ) -> StorageData {
        StorageData::from_file(parameter_name, value.encode(charset))
    }

    /// Row to upsert for `value`.
    pub fn persistence_record(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        direction: ParameterDirection,
        value: &TypedValue,
    ) -> TypePersistence {
        TypePersistence {
            run_id: run_id.clone(),
            parameter_name: parameter_name.to_string(),
            direction,
            value_type: self.value_type(),
            value: self.as_type().persisted_value(value),
            updated_at: Utc::now(),
        }
    }

    /// Row for a value kept only in storage, such as a directory of files.
    pub fn storage_record(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        direction: ParameterDirection,
    ) -> TypePersistence {
        TypePersistence {
            run_id: run_id.clone(),
            parameter_name: parameter_name.to_string(),
            direction,
            value_type: self.value_type(),
            value: PersistedValue::InStorage,
            updated_at: Utc::now(),
        }
    }

    /// Render a freshly validated value.
    pub fn build_response_value(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        value: &TypedValue,
    ) -> ParameterValue {
        ParameterValue {
            parameter_name: parameter_name.to_string(),
            task_run_id: run_id.clone(),
            value_type: self.value_type(),
            value: self.as_type().persisted_value(value),
        }
    }

    /// Render a stored row. Equivalent to [`Self::build_response_value`] on the
    /// value the row was built from.
    pub fn build_response_from_record(&self, record: &TypePersistence) -> ParameterValue {
        ParameterValue {
            parameter_name: record.parameter_name.clone(),
            task_run_id: record.run_id.clone(),
            value_type: self.value_type(),
            value: record.value.clone(),
        }
    }
}
