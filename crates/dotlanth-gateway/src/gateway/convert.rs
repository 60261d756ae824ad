// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Scalar conversion between wire strings and JSON values
//!
//! Path segments, query parameters, headers and cookies arrive as strings;
//! this module turns them into the JSON value the field kind expects and
//! renders response fields back into header strings.

use crate::descriptor::{EnumSchema, FieldKind, FieldSchema};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// What to do with an enum name the schema does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPolicy {
    /// Reject the request
    #[default]
    Strict,
    /// Substitute the enum's zero value
    ZeroValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    Invalid(String),
    UnknownEnum,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Invalid(reason) => f.write_str(reason),
            ConvertError::UnknownEnum => f.write_str("unknown enum value"),
        }
    }
}

/// Convert one raw string into the JSON value for `field`
pub fn from_wire(field: &FieldSchema, raw: &str, policy: EnumPolicy) -> Result<Value, ConvertError> {
    match &field.kind {
        FieldKind::String => Ok(Value::String(raw.to_string())),
        FieldKind::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(|| ConvertError::Invalid("expected a boolean".into())),
        FieldKind::Enum(schema) => enum_from_wire(schema, raw, policy),
        FieldKind::Int32 => parse_int::<i32>(raw, "int32"),
        FieldKind::Int64 => parse_int::<i64>(raw, "int64"),
        FieldKind::Uint32 => parse_int::<u32>(raw, "uint32"),
        FieldKind::Uint64 => parse_int::<u64>(raw, "uint64"),
        FieldKind::Float => {
            let value = parse_float(raw)?;
            if value.abs() > f32::MAX as f64 {
                return Err(ConvertError::Invalid("value out of range for float".into()));
            }
            finite_number(value).map(Value::Number)
        }
        FieldKind::Double => parse_float(raw).and_then(finite_number).map(Value::Number),
        FieldKind::Bytes => {
            let decoded = STANDARD
                .decode(raw)
                .or_else(|_| URL_SAFE.decode(raw))
                .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
                .map_err(|e| ConvertError::Invalid(format!("invalid base64: {}", e)))?;
            Ok(Value::String(STANDARD.encode(decoded)))
        }
        FieldKind::Message(schema) => Err(ConvertError::Invalid(format!("message {} cannot be read from a string", schema.name))),
    }
}

/// Render a response field as a header value
pub fn to_wire(field: &FieldSchema, value: &Value) -> String {
    match (value, &field.kind) {
        (Value::String(s), _) => s.clone(),
        (Value::Bool(b), _) => b.to_string(),
        (Value::Number(n), FieldKind::Enum(schema)) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .and_then(|n| schema.by_number(n))
            .map(|v| v.name.clone())
            .unwrap_or_else(|| n.to_string()),
        (Value::Number(n), _) => n.to_string(),
        (other, _) => other.to_string(),
    }
}

/// Boolean spellings accepted on the wire
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_int<T>(raw: &str, kind: &str) -> Result<Value, ConvertError>
where
    T: FromStr + Into<Number>,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map(|n| Value::Number(n.into()))
        .map_err(|e| ConvertError::Invalid(format!("invalid {}: {}", kind, e)))
}

fn parse_float(raw: &str) -> Result<f64, ConvertError> {
    raw.parse().map_err(|e| ConvertError::Invalid(format!("invalid number: {}", e)))
}

fn finite_number(value: f64) -> Result<Number, ConvertError> {
    Number::from_f64(value).ok_or_else(|| ConvertError::Invalid("number must be finite".into()))
}

fn enum_from_wire(schema: &EnumSchema, raw: &str, policy: EnumPolicy) -> Result<Value, ConvertError> {
    let declared = schema
        .by_name(raw)
        .or_else(|| raw.parse::<i32>().ok().and_then(|n| schema.by_number(n)));
    match (declared, policy) {
        (Some(value), _) => Ok(Value::String(value.name.clone())),
        (None, EnumPolicy::ZeroValue) => schema
            .zero_value()
            .map(|v| Value::String(v.name.clone()))
            .ok_or(ConvertError::UnknownEnum),
        (None, EnumPolicy::Strict) => Err(ConvertError::UnknownEnum),
    }
}
