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

//! Field binding resolution
//!
//! Every field of a message gets exactly one source: a path parameter, a
//! query parameter, a header, a cookie or the JSON body. Bindings are
//! resolved once, at registration, and drive both request decoding and
//! response encoding.

use super::convert::{self, ConvertError, EnumPolicy};
use super::status::Status;
use crate::descriptor::{FieldSchema, MessageSchema, Verb};
use crate::error::{ConfigError, DecodeError};
use hyper::HeaderMap;
use hyper::header::{COOKIE, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Where a field's value travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    /// Not yet resolved
    Unbound,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Path => "path",
            Source::Query => "query",
            Source::Header => "header",
            Source::Cookie => "cookie",
            Source::Body => "body",
            Source::Unbound => "unbound",
        })
    }
}

/// Role of a message in a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Request(Verb),
    Response,
    Stream,
}

impl MessageRole {
    fn name(self) -> &'static str {
        match self {
            MessageRole::Request(_) => "request",
            MessageRole::Response => "response",
            MessageRole::Stream => "stream",
        }
    }

    fn default_source(self) -> Source {
        match self {
            MessageRole::Request(verb) if !verb.has_body() => Source::Query,
            _ => Source::Body,
        }
    }

    fn allows(self, source: Source) -> bool {
        match self {
            MessageRole::Request(_) => true,
            MessageRole::Response => matches!(source, Source::Header | Source::Body),
            MessageRole::Stream => source == Source::Body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    pub field: FieldSchema,
    pub source: Source,
    /// Parameter, header or cookie name; the JSON key for body fields
    pub wire_name: String,
}

/// Resolved bindings for every field of one message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBinding {
    pub message: String,
    pub fields: Vec<FieldBinding>,
}

/// Resolve the binding table of `schema` in the given role
pub fn resolve(schema: &MessageSchema, role: MessageRole) -> Result<MessageBinding, ConfigError> {
    let mut fields = Vec::with_capacity(schema.fields.len());

    for field in &schema.fields {
        let annotations = &field.annotations;
        let declared = [
            (Source::Path, &annotations.in_path),
            (Source::Query, &annotations.in_query),
            (Source::Header, &annotations.in_header),
            (Source::Cookie, &annotations.in_cookie),
        ];

        let mut source = Source::Unbound;
        let mut wire_name = field.name.clone();
        for (candidate, name) in declared {
            let Some(name) = name else { continue };
            if source != Source::Unbound {
                return Err(ConfigError::MultipleSources {
                    message: schema.name.clone(),
                    field: field.name.clone(),
                });
            }
            source = candidate;
            if !name.is_empty() {
                wire_name = name.clone();
            }
        }
        if source == Source::Unbound {
            source = role.default_source();
        }

        if !role.allows(source) {
            return Err(ConfigError::IllegalSource {
                message: schema.name.clone(),
                field: field.name.clone(),
                binding: source,
                role: role.name(),
            });
        }

        if source != Source::Body {
            let repeated_ok = source == Source::Query;
            if !field.kind.is_scalar() || (field.repeated && !repeated_ok) {
                return Err(ConfigError::NotScalar {
                    message: schema.name.clone(),
                    field: field.name.clone(),
                    binding: source,
                });
            }
        }

        if source == Source::Header {
            wire_name = wire_name.to_ascii_lowercase();
            if HeaderName::from_bytes(wire_name.as_bytes()).is_err() {
                return Err(ConfigError::InvalidWireName {
                    message: schema.name.clone(),
                    field: field.name.clone(),
                    binding: source,
                    name: wire_name,
                });
            }
            if fields.iter().any(|b: &FieldBinding| b.source == Source::Header && b.wire_name == wire_name) {
                return Err(ConfigError::DuplicateWireName {
                    message: schema.name.clone(),
                    field: field.name.clone(),
                    binding: source,
                    name: wire_name,
                });
            }
        }

        fields.push(FieldBinding {
            field: field.clone(),
            source,
            wire_name,
        });
    }

    Ok(MessageBinding {
        message: schema.name.clone(),
        fields,
    })
}

/// Raw, unconverted pieces of an HTTP request
#[derive(Debug, Clone, Copy)]
pub struct RawRequest<'a> {
    pub params: &'a [(String, String)],
    pub query: &'a [(String, String)],
    pub headers: &'a HeaderMap,
}

impl<'a> RawRequest<'a> {
    fn param(&self, name: &str) -> Option<&'a str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn query_all(&self, name: &str) -> Vec<&'a str> {
        self.query.iter().filter(|(k, _)| k == name).map(|(_, v)| v.as_str()).collect()
    }

    fn header(&self, name: &str) -> Result<Option<&'a str>, DecodeError> {
        match self.headers.get(name) {
            Some(value) => value
                .to_str()
                .map(Some)
                .map_err(|_| DecodeError::InvalidHeaderEncoding { name: name.to_string() }),
            None => Ok(None),
        }
    }

    fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }
}

impl MessageBinding {
    /// Path parameter names this message expects
    pub fn path_params(&self) -> impl Iterator<Item = &FieldBinding> {
        self.fields.iter().filter(|b| b.source == Source::Path)
    }

    pub fn header_fields(&self) -> impl Iterator<Item = &FieldBinding> {
        self.fields.iter().filter(|b| b.source == Source::Header)
    }

    pub fn by_source(&self, source: Source) -> impl Iterator<Item = &FieldBinding> {
        self.fields.iter().filter(move |b| b.source == source)
    }

    /// Build the request JSON object from the decoded body and the bound scalars.
    ///
    /// Absent path, query and header values leave the field unset. A missing
    /// cookie is an error.
    pub fn decode_request(&self, raw: &RawRequest<'_>, body: Option<Map<String, Value>>, policy: EnumPolicy) -> Result<Value, DecodeError> {
        let mut object = body.unwrap_or_default();

        for binding in &self.fields {
            let value = match binding.source {
                Source::Body | Source::Unbound => continue,
                Source::Path => raw.param(&binding.wire_name).map(|v| convert_field(binding, v, policy)).transpose()?,
                Source::Query if binding.field.repeated => {
                    let values = raw.query_all(&binding.wire_name);
                    if values.is_empty() {
                        None
                    } else {
                        let converted = values.into_iter().map(|v| convert_field(binding, v, policy)).collect::<Result<Vec<_>, _>>()?;
                        Some(Value::Array(converted))
                    }
                }
                Source::Query => raw.query_all(&binding.wire_name).first().map(|v| convert_field(binding, v, policy)).transpose()?,
                Source::Header => raw.header(&binding.wire_name)?.map(|v| convert_field(binding, v, policy)).transpose()?,
                Source::Cookie => {
                    let value = raw.cookie(&binding.wire_name).ok_or_else(|| DecodeError::MissingCookie {
                        name: binding.wire_name.clone(),
                    })?;
                    Some(convert_field(binding, value, policy)?)
                }
            };
            if let Some(value) = value {
                object.insert(binding.field.name.clone(), value);
            }
        }

        Ok(Value::Object(object))
    }

    /// Split a handler's response into header-bound fields and the JSON body
    pub fn encode_response(&self, value: Value) -> Result<(HeaderMap, Value), Status> {
        let mut headers = HeaderMap::new();
        let mut object = match value {
            Value::Object(object) => object,
            other if self.header_fields().next().is_none() => return Ok((headers, other)),
            _ => return Err(Status::internal(format!("response {} must serialize to a JSON object", self.message))),
        };

        for binding in self.header_fields() {
            let Some(value) = object.remove(&binding.field.name) else { continue };
            if value.is_null() {
                continue;
            }
            let name = HeaderName::from_bytes(binding.wire_name.as_bytes()).map_err(|e| Status::internal(format!("invalid header name {}: {}", binding.wire_name, e)))?;
            let text = convert::to_wire(&binding.field, &value);
            let value = HeaderValue::from_str(&text).map_err(|e| Status::internal(format!("field {} cannot be sent as a header: {}", binding.field.name, e)))?;
            headers.insert(name, value);
        }

        Ok((headers, Value::Object(object)))
    }

    /// Reassemble a response from its headers and JSON body, as a client would
    pub fn decode_response(&self, headers: &HeaderMap, body: &[u8], policy: EnumPolicy) -> Result<Value, DecodeError> {
        let mut object = if body.is_empty() {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body)? {
                Value::Object(object) => object,
                _ => return Err(DecodeError::BodyNotObject),
            }
        };
        let raw = RawRequest { params: &[], query: &[], headers };
        for binding in self.header_fields() {
            if let Some(value) = raw.header(&binding.wire_name)? {
                object.insert(binding.field.name.clone(), convert_field(binding, value, policy)?);
            }
        }
        Ok(Value::Object(object))
    }
}

fn convert_field(binding: &FieldBinding, raw: &str, policy: EnumPolicy) -> Result<Value, DecodeError> {
    convert::from_wire(&binding.field, raw, policy).map_err(|err| match err {
        ConvertError::UnknownEnum => DecodeError::UnknownEnumValue {
            field: binding.field.name.clone(),
            value: raw.to_string(),
        },
        ConvertError::Invalid(reason) => DecodeError::InvalidValue {
            field: binding.field.name.clone(),
            binding: binding.source,
            value: raw.to_string(),
            reason,
        },
    })
}
