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

//! Service descriptors
//!
//! Immutable descriptions of the services a gateway serves: methods and
//! streams, their HTTP mapping and the schema of every message they carry.

use crate::gateway::handler::{StreamMethod, UnaryMethod};
use hyper::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP verb a unary method is served under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl Verb {
    /// Whether requests under this verb carry a JSON body
    pub fn has_body(self) -> bool {
        matches!(self, Verb::Post | Verb::Put | Verb::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
            Verb::Options => "OPTIONS",
            Verb::Head => "HEAD",
            Verb::Patch => "PATCH",
            Verb::Trace => "TRACE",
        }
    }

    pub fn to_method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Put => Method::PUT,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
            Verb::Options => Method::OPTIONS,
            Verb::Head => Method::HEAD,
            Verb::Patch => Method::PATCH,
            Verb::Trace => Method::TRACE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "PUT" => Ok(Verb::Put),
            "POST" => Ok(Verb::Post),
            "DELETE" => Ok(Verb::Delete),
            "OPTIONS" => Ok(Verb::Options),
            "HEAD" => Ok(Verb::Head),
            "PATCH" => Ok(Verb::Patch),
            "TRACE" => Ok(Verb::Trace),
            other => Err(format!("unsupported HTTP verb: {}", other)),
        }
    }
}

/// A single declared enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
}

/// Enum type carried by an enum field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSchema {
    pub name: String,
    pub values: Vec<EnumValue>,
}

impl EnumSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), values: Vec::new() }
    }

    pub fn value(mut self, name: impl Into<String>, number: i32) -> Self {
        self.values.push(EnumValue { name: name.into(), number });
        self
    }

    pub fn by_name(&self, name: &str) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn by_number(&self, number: i32) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.number == number)
    }

    /// Value used when an unknown name is accepted leniently
    pub fn zero_value(&self) -> Option<&EnumValue> {
        self.by_number(0).or_else(|| self.values.first())
    }
}

/// Kind of a message field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Bool,
    Enum(EnumSchema),
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float,
    Double,
    Bytes,
    Message(MessageSchema),
}

impl FieldKind {
    /// Scalars are the kinds that can be read from a single string
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldKind::Message(_))
    }

    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bool => "bool",
            FieldKind::Enum(schema) => &schema.name,
            FieldKind::Int32 => "int32",
            FieldKind::Int64 => "int64",
            FieldKind::Uint32 => "uint32",
            FieldKind::Uint64 => "uint64",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::Bytes => "bytes",
            FieldKind::Message(schema) => &schema.name,
        }
    }
}

/// Per-field HTTP annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAnnotations {
    pub in_path: Option<String>,
    pub in_query: Option<String>,
    pub in_header: Option<String>,
    pub in_cookie: Option<String>,
    pub required: bool,
    pub deprecated: bool,
    pub allow_empty_value: bool,
    pub description: Option<String>,
}

/// A field of a message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    /// JSON key of the field
    pub name: String,
    pub kind: FieldKind,
    pub repeated: bool,
    pub annotations: FieldAnnotations,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            repeated: false,
            annotations: FieldAnnotations::default(),
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn in_path(mut self, name: impl Into<String>) -> Self {
        self.annotations.in_path = Some(name.into());
        self
    }

    pub fn in_query(mut self, name: impl Into<String>) -> Self {
        self.annotations.in_query = Some(name.into());
        self
    }

    pub fn in_header(mut self, name: impl Into<String>) -> Self {
        self.annotations.in_header = Some(name.into());
        self
    }

    pub fn in_cookie(mut self, name: impl Into<String>) -> Self {
        self.annotations.in_cookie = Some(name.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.annotations.required = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.annotations.deprecated = true;
        self
    }

    pub fn allow_empty_value(mut self) -> Self {
        self.annotations.allow_empty_value = true;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.annotations.description = Some(text.into());
        self
    }
}

/// Schema of a request, response or stream message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub description: Option<String>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            description: None,
        }
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A unary method exposed over HTTP
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    /// A method without a verb is rejected at registration
    pub verb: Option<Verb>,
    pub path: String,
    pub request: MessageSchema,
    pub response: MessageSchema,
    pub handler: Arc<dyn UnaryMethod>,
    pub summary: Option<String>,
    pub operation_id: Option<String>,
    pub description: Option<String>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, verb: Verb, path: impl Into<String>, handler: Arc<dyn UnaryMethod>) -> Self {
        let name = name.into();
        Self {
            request: MessageSchema::new(format!("{}Request", name)),
            response: MessageSchema::new(format!("{}Response", name)),
            name,
            verb: Some(verb),
            path: path.into(),
            handler,
            summary: None,
            operation_id: None,
            description: None,
        }
    }

    pub fn request(mut self, schema: MessageSchema) -> Self {
        self.request = schema;
        self
    }

    pub fn response(mut self, schema: MessageSchema) -> Self {
        self.response = schema;
        self
    }

    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("request", &self.request.name)
            .field("response", &self.response.name)
            .finish_non_exhaustive()
    }
}

/// A streaming method reached through a WebSocket upgrade on GET
#[derive(Clone)]
pub struct StreamDescriptor {
    pub name: String,
    pub path: String,
    pub request: MessageSchema,
    pub response: MessageSchema,
    pub handler: Arc<dyn StreamMethod>,
    pub server_streams: bool,
    pub client_streams: bool,
    pub description: Option<String>,
}

impl StreamDescriptor {
    /// A bidirectional stream; narrow it with [`StreamDescriptor::directions`]
    pub fn new(name: impl Into<String>, path: impl Into<String>, handler: Arc<dyn StreamMethod>) -> Self {
        let name = name.into();
        Self {
            request: MessageSchema::new(format!("{}Request", name)),
            response: MessageSchema::new(format!("{}Response", name)),
            name,
            path: path.into(),
            handler,
            server_streams: true,
            client_streams: true,
            description: None,
        }
    }

    pub fn directions(mut self, client_streams: bool, server_streams: bool) -> Self {
        self.client_streams = client_streams;
        self.server_streams = server_streams;
        self
    }

    pub fn request(mut self, schema: MessageSchema) -> Self {
        self.request = schema;
        self
    }

    pub fn response(mut self, schema: MessageSchema) -> Self {
        self.response = schema;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

impl fmt::Debug for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("client_streams", &self.client_streams)
            .field("server_streams", &self.server_streams)
            .finish_non_exhaustive()
    }
}

/// A service: its methods, its streams and an optional path prefix
#[derive(Debug, Clone, Default)]
pub struct ServiceDescriptor {
    /// Fully qualified name, unique per server
    pub name: String,
    pub prefix: String,
    pub methods: Vec<MethodDescriptor>,
    pub streams: Vec<StreamDescriptor>,
    /// Opaque to the gateway
    pub metadata: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn stream(mut self, stream: StreamDescriptor) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// RPC-style full method name, `/service/method`
    pub fn full_method(&self, method: &str) -> String {
        format!("/{}/{}", self.name, method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_body() {
        assert!(Verb::Post.has_body());
        assert!(Verb::Put.has_body());
        assert!(Verb::Patch.has_body());
        assert!(!Verb::Get.has_body());
        assert!(!Verb::Delete.has_body());
        assert!(!Verb::Head.has_body());
    }

    #[test]
    fn test_verb_parse() {
        assert_eq!("get".parse::<Verb>().unwrap(), Verb::Get);
        assert_eq!("PATCH".parse::<Verb>().unwrap(), Verb::Patch);
        assert!("CONNECT".parse::<Verb>().is_err());
        assert_eq!(Verb::Options.to_method(), Method::OPTIONS);
    }

    #[test]
    fn test_enum_zero_value() {
        let schema = EnumSchema::new("Color").value("RED", 1).value("UNSPECIFIED", 0);
        assert_eq!(schema.zero_value().unwrap().name, "UNSPECIFIED");
        let schema = EnumSchema::new("Color").value("RED", 1);
        assert_eq!(schema.zero_value().unwrap().name, "RED");
    }
}
