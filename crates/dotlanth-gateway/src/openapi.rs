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

//! OpenAPI document generation
//!
//! Builds an OpenAPI 3.1 style document from service descriptors: unary
//! methods under `paths`, streams under `channels`. Field placement follows
//! the same binding rules the server uses at runtime.

use crate::descriptor::{FieldKind, FieldSchema, MessageSchema, ServiceDescriptor};
use crate::error::ConfigError;
use crate::gateway::binding::{self, MessageBinding, MessageRole, Source};
use crate::gateway::router::PathTemplate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Document-level information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInfo {
    pub title: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Describe enums by name rather than by number
    #[serde(default = "default_enum_as_string")]
    pub enum_as_string: bool,
}

fn default_enum_as_string() -> bool {
    true
}

impl Default for ApiInfo {
    fn default() -> Self {
        Self {
            title: "Dotlanth Gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: None,
            enum_as_string: true,
        }
    }
}

/// Generate the document for `services`
pub fn document(services: &[ServiceDescriptor], info: &ApiInfo) -> Result<Value, ConfigError> {
    let mut paths = Map::new();
    let mut channels = Map::new();

    for service in services {
        for method in &service.methods {
            let verb = method.verb.ok_or_else(|| ConfigError::MissingVerb {
                service: service.name.clone(),
                method: method.name.clone(),
            })?;
            let template = PathTemplate::parse(&format!("{}{}", service.prefix, method.path))?;
            let request = binding::resolve(&method.request, MessageRole::Request(verb))?;
            let response = binding::resolve(&method.response, MessageRole::Response)?;

            let mut operation = Map::new();
            operation.insert("operationId".into(), json!(method.operation_id.clone().unwrap_or_else(|| method.name.clone())));
            if let Some(summary) = &method.summary {
                operation.insert("summary".into(), json!(summary));
            }
            if let Some(description) = &method.description {
                operation.insert("description".into(), json!(description));
            }
            operation.insert("tags".into(), json!([service.name]));
            operation.insert("parameters".into(), Value::Array(parameters(&request, info)));
            if verb.has_body() {
                operation.insert("requestBody".into(), request_body(&method.request, &request, info));
            }
            operation.insert("responses".into(), json!({ "default": response_object(&method.response, &response, info) }));

            let entry = paths.entry(template.route).or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(entry) = entry {
                entry.insert(verb.as_str().to_ascii_lowercase(), Value::Object(operation));
            }
        }

        for stream in &service.streams {
            let template = PathTemplate::parse(&format!("{}{}", service.prefix, stream.path))?;
            binding::resolve(&stream.request, MessageRole::Stream)?;
            binding::resolve(&stream.response, MessageRole::Stream)?;
            let mut channel = json!({
                "publish": { "message": { "payload": message_schema(&stream.request, info) } },
                "subscribe": { "message": { "payload": message_schema(&stream.response, info) } },
            });
            if let Some(description) = &stream.description {
                channel["description"] = json!(description);
            }
            channels.insert(template.route, channel);
        }
    }

    let mut info_object = json!({ "title": info.title, "version": info.version });
    if let Some(description) = &info.description {
        info_object["description"] = json!(description);
    }

    Ok(json!({
        "openapi": "3.1.0",
        "info": info_object,
        "paths": paths,
        "channels": channels,
    }))
}

fn parameters(request: &MessageBinding, info: &ApiInfo) -> Vec<Value> {
    request
        .fields
        .iter()
        .filter(|b| matches!(b.source, Source::Path | Source::Query | Source::Header | Source::Cookie))
        .map(|b| {
            let annotations = &b.field.annotations;
            let mut parameter = json!({
                "name": b.wire_name,
                "in": b.source.to_string(),
                // Path parameters are always required
                "required": annotations.required || b.source == Source::Path,
                "deprecated": annotations.deprecated,
                "allowEmptyValue": annotations.allow_empty_value,
                "schema": field_schema(&b.field, info),
            });
            if let Some(description) = &annotations.description {
                parameter["description"] = json!(description);
            }
            parameter
        })
        .collect()
}

fn request_body(schema: &MessageSchema, request: &MessageBinding, info: &ApiInfo) -> Value {
    let body_fields: Vec<&FieldSchema> = request.by_source(Source::Body).map(|b| &b.field).collect();
    let mut body = json!({
        "content": { "application/json": { "schema": object_schema(&body_fields, info) } },
    });
    if let Some(description) = &schema.description {
        body["description"] = json!(description);
    }
    body
}

fn response_object(schema: &MessageSchema, response: &MessageBinding, info: &ApiInfo) -> Value {
    let body_fields: Vec<&FieldSchema> = response.by_source(Source::Body).map(|b| &b.field).collect();
    let mut headers = Map::new();
    for b in response.header_fields() {
        let mut header = json!({ "schema": field_schema(&b.field, info) });
        if let Some(description) = &b.field.annotations.description {
            header["description"] = json!(description);
        }
        headers.insert(b.wire_name.clone(), header);
    }
    json!({
        "description": schema.description.clone().unwrap_or_else(|| schema.name.clone()),
        "content": { "application/json": { "schema": object_schema(&body_fields, info) } },
        "headers": headers,
    })
}

fn message_schema(schema: &MessageSchema, info: &ApiInfo) -> Value {
    let fields: Vec<&FieldSchema> = schema.fields.iter().collect();
    let mut object = object_schema(&fields, info);
    if let Some(description) = &schema.description {
        object["description"] = json!(description);
    }
    object
}

fn object_schema(fields: &[&FieldSchema], info: &ApiInfo) -> Value {
    let properties: Map<String, Value> = fields.iter().map(|f| (f.name.clone(), field_schema(f, info))).collect();
    let required: Vec<&str> = fields.iter().filter(|f| f.annotations.required).map(|f| f.name.as_str()).collect();
    let mut object = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        object["required"] = json!(required);
    }
    object
}

fn field_schema(field: &FieldSchema, info: &ApiInfo) -> Value {
    let mut schema = match &field.kind {
        FieldKind::Bool => json!({ "type": "boolean" }),
        FieldKind::String => json!({ "type": "string" }),
        FieldKind::Enum(e) if info.enum_as_string => {
            json!({ "type": "string", "enum": e.values.iter().map(|v| v.name.as_str()).collect::<Vec<_>>() })
        }
        FieldKind::Enum(e) => json!({ "type": "integer", "enum": e.values.iter().map(|v| v.number).collect::<Vec<_>>() }),
        FieldKind::Int32 | FieldKind::Uint32 => json!({ "type": "integer", "format": "int32" }),
        FieldKind::Int64 | FieldKind::Uint64 => json!({ "type": "integer", "format": "int64" }),
        FieldKind::Float => json!({ "type": "number", "format": "float" }),
        FieldKind::Double => json!({ "type": "number", "format": "double" }),
        FieldKind::Bytes => json!({ "type": "string", "format": "byte" }),
        FieldKind::Message(message) => message_schema(message, info),
    };
    if field.repeated {
        schema = json!({ "type": "array", "items": schema });
    }
    if let Some(description) = &field.annotations.description {
        schema["description"] = json!(description);
    }
    if field.annotations.deprecated {
        schema["deprecated"] = json!(true);
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EnumSchema, MethodDescriptor, StreamDescriptor, Verb};
    use crate::gateway::handler::{stream_fn, unary_fn};

    fn service() -> ServiceDescriptor {
        let handler = unary_fn(|_ctx, req: Value| async move { Ok(req) });
        let status = EnumSchema::new("State").value("STATE_UNSPECIFIED", 0).value("ACTIVE", 1);
        ServiceDescriptor::new("shop.Items")
            .prefix("/api")
            .method(
                MethodDescriptor::new("GetItem", Verb::Get, "/items/:id", handler.clone())
                    .summary("Fetch one item")
                    .request(
                        MessageSchema::new("GetItemRequest")
                            .field(FieldSchema::new("id", FieldKind::Int64).in_path("id"))
                            .field(FieldSchema::new("fields", FieldKind::String).repeated())
                            .field(FieldSchema::new("token", FieldKind::String).in_header("x-token").required()),
                    )
                    .response(
                        MessageSchema::new("Item")
                            .field(FieldSchema::new("name", FieldKind::String))
                            .field(FieldSchema::new("state", FieldKind::Enum(status)))
                            .field(FieldSchema::new("etag", FieldKind::String).in_header("etag")),
                    ),
            )
            .method(
                MethodDescriptor::new("UpdateItem", Verb::Put, "/items/{id}", handler).request(
                    MessageSchema::new("UpdateItemRequest")
                        .field(FieldSchema::new("id", FieldKind::Int64).in_path("id"))
                        .field(FieldSchema::new("name", FieldKind::String).required()),
                ),
            )
            .stream(StreamDescriptor::new("Watch", "/items/watch", stream_fn(|_ctx, _stream| async move { Ok(()) })))
    }

    #[test]
    fn test_paths_and_parameters() {
        let doc = document(&[service()], &ApiInfo::default()).unwrap();
        let get = &doc["paths"]["/api/items/{id}"]["get"];
        assert_eq!(get["summary"], "Fetch one item");
        let params = get["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0]["in"], "path");
        assert_eq!(params[0]["required"], true);
        assert_eq!(params[1]["in"], "query");
        assert_eq!(params[1]["schema"]["type"], "array");
        assert_eq!(params[2]["name"], "x-token");
        assert!(get.get("requestBody").is_none());

        let response = &get["responses"]["default"];
        assert!(response["headers"]["etag"].is_object());
        let props = &response["content"]["application/json"]["schema"]["properties"];
        assert!(props.get("etag").is_none());
        assert_eq!(props["state"]["enum"], json!(["STATE_UNSPECIFIED", "ACTIVE"]));

        let put = &doc["paths"]["/api/items/{id}"]["put"];
        assert_eq!(put["requestBody"]["content"]["application/json"]["schema"]["required"], json!(["name"]));
    }

    #[test]
    fn test_channels_and_numeric_enums() {
        let info = ApiInfo {
            enum_as_string: false,
            ..Default::default()
        };
        let doc = document(&[service()], &info).unwrap();
        assert!(doc["channels"]["/api/items/watch"]["publish"]["message"]["payload"].is_object());
        let state = &doc["paths"]["/api/items/{id}"]["get"]["responses"]["default"]["content"]["application/json"]["schema"]["properties"]["state"];
        assert_eq!(state["type"], "integer");
        assert_eq!(state["enum"], json!([0, 1]));
    }

    #[test]
    fn test_invalid_binding_is_reported() {
        let handler = unary_fn(|_ctx, req: Value| async move { Ok(req) });
        let service = ServiceDescriptor::new("bad.Svc").method(
            MethodDescriptor::new("Get", Verb::Get, "/x", handler).response(MessageSchema::new("Reply").field(FieldSchema::new("id", FieldKind::String).in_query("id"))),
        );
        assert!(matches!(document(&[service], &ApiInfo::default()), Err(ConfigError::IllegalSource { .. })));
    }
}
