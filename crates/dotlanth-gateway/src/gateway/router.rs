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

//! Route table
//!
//! Maps (method, path) to a unary route or a stream route. Templates use
//! single-segment named parameters written `{name}` or `:name`. The table is
//! built by registration and read without locking afterwards.

use super::binding::{self, MessageBinding, MessageRole};
use super::handler::{StreamMethod, UnaryMethod};
use crate::descriptor::{ServiceDescriptor, Verb};
use crate::error::ConfigError;
use hyper::Method;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static PARAM_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid parameter regex"));

/// A parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    /// Template in router syntax, always `{name}` parameters
    pub route: String,
    pub params: Vec<String>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPathTemplate {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if !raw.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }

        let mut params = Vec::new();
        let mut segments = Vec::new();
        for segment in raw[1..].split('/') {
            let name = if let Some(name) = segment.strip_prefix(':') {
                Some(name)
            } else if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(inner)
            } else {
                None
            };

            match name {
                Some(name) => {
                    if !PARAM_NAME.is_match(name) {
                        return Err(invalid(&format!("invalid parameter name {:?}", name)));
                    }
                    if params.iter().any(|p| p == name) {
                        return Err(invalid(&format!("parameter {} appears twice", name)));
                    }
                    params.push(name.to_string());
                    segments.push(format!("{{{}}}", name));
                }
                None if segment.contains(['{', '}', '*']) => {
                    return Err(invalid(&format!("unsupported segment {:?}", segment)));
                }
                None => segments.push(segment.to_string()),
            }
        }

        Ok(Self {
            route: format!("/{}", segments.join("/")),
            params,
        })
    }
}

/// A registered unary method
pub struct UnaryRoute {
    pub service: String,
    pub method: String,
    pub full_method: String,
    pub verb: Verb,
    pub template: PathTemplate,
    pub request: MessageBinding,
    pub response: MessageBinding,
    pub handler: Arc<dyn UnaryMethod>,
}

/// A registered stream
pub struct StreamRoute {
    pub service: String,
    pub name: String,
    pub full_method: String,
    pub template: PathTemplate,
    pub request: MessageBinding,
    pub response: MessageBinding,
    pub client_streams: bool,
    pub server_streams: bool,
    pub handler: Arc<dyn StreamMethod>,
}

/// What a route leads to
#[derive(Clone)]
pub enum RouteTarget {
    Unary(Arc<UnaryRoute>),
    Stream(Arc<StreamRoute>),
}

impl RouteTarget {
    pub fn full_method(&self) -> &str {
        match self {
            RouteTarget::Unary(route) => &route.full_method,
            RouteTarget::Stream(route) => &route.full_method,
        }
    }
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Unary(route) => write!(f, "Unary({} {})", route.verb, route.full_method),
            RouteTarget::Stream(route) => write!(f, "Stream({})", route.full_method),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub target: RouteTarget,
    /// Percent-decoded path captures
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub enum Lookup {
    Found(RouteMatch),
    /// The path exists under other methods
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

#[derive(Clone, Default)]
pub struct RouteTable {
    services: BTreeMap<String, String>,
    routers: HashMap<Method, matchit::Router<RouteTarget>>,
    routes: Vec<(Method, String, RouteTarget)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every method and stream of `service`. On error the table is unchanged.
    pub fn register(&mut self, service: &ServiceDescriptor) -> Result<(), ConfigError> {
        let mut next = self.clone();
        next.insert_service(service)?;
        *self = next;
        Ok(())
    }

    fn insert_service(&mut self, service: &ServiceDescriptor) -> Result<(), ConfigError> {
        if self.services.contains_key(&service.name) {
            return Err(ConfigError::DuplicateService {
                service: service.name.clone(),
            });
        }
        self.services.insert(service.name.clone(), service.metadata.clone());

        let mut names = Vec::with_capacity(service.methods.len() + service.streams.len());
        let mut check_name = |name: &str| -> Result<(), ConfigError> {
            if names.iter().any(|n: &String| n == name) {
                return Err(ConfigError::DuplicateMethod {
                    service: service.name.clone(),
                    method: name.to_string(),
                });
            }
            names.push(name.to_string());
            Ok(())
        };

        for method in &service.methods {
            check_name(&method.name)?;
            let verb = method.verb.ok_or_else(|| ConfigError::MissingVerb {
                service: service.name.clone(),
                method: method.name.clone(),
            })?;
            let template = PathTemplate::parse(&format!("{}{}", service.prefix, method.path))?;
            let request = binding::resolve(&method.request, MessageRole::Request(verb))?;
            let response = binding::resolve(&method.response, MessageRole::Response)?;
            check_path_params(&request, &template)?;

            let route = UnaryRoute {
                service: service.name.clone(),
                method: method.name.clone(),
                full_method: service.full_method(&method.name),
                verb,
                template,
                request,
                response,
                handler: method.handler.clone(),
            };
            self.insert(verb.to_method(), RouteTarget::Unary(Arc::new(route)))?;
        }

        for stream in &service.streams {
            check_name(&stream.name)?;
            if !stream.client_streams && !stream.server_streams {
                return Err(ConfigError::NoStreamDirection {
                    service: service.name.clone(),
                    stream: stream.name.clone(),
                });
            }
            let template = PathTemplate::parse(&format!("{}{}", service.prefix, stream.path))?;
            let route = StreamRoute {
                service: service.name.clone(),
                name: stream.name.clone(),
                full_method: service.full_method(&stream.name),
                template,
                request: binding::resolve(&stream.request, MessageRole::Stream)?,
                response: binding::resolve(&stream.response, MessageRole::Stream)?,
                client_streams: stream.client_streams,
                server_streams: stream.server_streams,
                handler: stream.handler.clone(),
            };
            self.insert(Method::GET, RouteTarget::Stream(Arc::new(route)))?;
        }

        Ok(())
    }

    fn insert(&mut self, method: Method, target: RouteTarget) -> Result<(), ConfigError> {
        let path = match &target {
            RouteTarget::Unary(route) => route.template.route.clone(),
            RouteTarget::Stream(route) => route.template.route.clone(),
        };
        self.routers
            .entry(method.clone())
            .or_insert_with(matchit::Router::new)
            .insert(path.clone(), target.clone())
            .map_err(|e| ConfigError::DuplicateRoute {
                verb: method.to_string(),
                path: path.clone(),
                conflict: e.to_string(),
            })?;
        debug!("Registered route {} {} -> {}", method, path, target.full_method());
        self.routes.push((method, path, target));
        Ok(())
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(found) = self.routers.get(method).and_then(|router| router.at(path).ok()) {
            let params = found
                .params
                .iter()
                .map(|(k, v)| (k.to_string(), percent_decode_str(v).decode_utf8_lossy().into_owned()))
                .collect();
            return Lookup::Found(RouteMatch {
                target: found.value.clone(),
                params,
            });
        }

        let mut allowed: Vec<Method> = self
            .routers
            .iter()
            .filter(|(m, router)| *m != method && router.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            Lookup::NotFound
        } else {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            Lookup::MethodNotAllowed(allowed)
        }
    }

    pub fn contains_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Registered routes in registration order
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str, &RouteTarget)> {
        self.routes.iter().map(|(m, p, t)| (m, p.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn check_path_params(request: &MessageBinding, template: &PathTemplate) -> Result<(), ConfigError> {
    for binding in request.path_params() {
        if !template.params.contains(&binding.wire_name) {
            return Err(ConfigError::UnknownPathParam {
                message: request.message.clone(),
                field: binding.field.name.clone(),
                param: binding.wire_name.clone(),
                path: template.route.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldKind, FieldSchema, MessageSchema, MethodDescriptor, StreamDescriptor};
    use crate::gateway::handler::{stream_fn, unary_fn};
    use serde_json::Value;

    fn echo() -> Arc<dyn UnaryMethod> {
        unary_fn(|_ctx, req: Value| async move { Ok(req) })
    }

    fn items_service(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name)
            .method(
                MethodDescriptor::new("GetItem", Verb::Get, "/items/{id}", echo())
                    .request(MessageSchema::new("GetItemRequest").field(FieldSchema::new("id", FieldKind::Int64).in_path("id"))),
            )
            .method(MethodDescriptor::new("CreateItem", Verb::Post, "/items", echo()))
    }

    #[test]
    fn test_template_parsing() {
        let t = PathTemplate::parse("/items/:id/parts/{part}").unwrap();
        assert_eq!(t.route, "/items/{id}/parts/{part}");
        assert_eq!(t.params, vec!["id".to_string(), "part".to_string()]);

        assert!(PathTemplate::parse("items").is_err());
        assert!(PathTemplate::parse("/items/{*rest}").is_err());
        assert!(PathTemplate::parse("/items/{id}/{id}").is_err());
        assert!(PathTemplate::parse("/items/x{id}").is_err());
    }

    #[test]
    fn test_lookup_with_params() {
        let mut table = RouteTable::new();
        table.register(&items_service("shop.Items")).unwrap();
        match table.lookup(&Method::GET, "/items/4%202") {
            Lookup::Found(found) => {
                assert_eq!(found.params, vec![("id".to_string(), "4 2".to_string())]);
                assert_eq!(found.target.full_method(), "/shop.Items/GetItem");
            }
            other => panic!("expected a route, got {:?}", other),
        }
        assert!(matches!(table.lookup(&Method::GET, "/nothing"), Lookup::NotFound));
        match table.lookup(&Method::DELETE, "/items/1") {
            Lookup::MethodNotAllowed(allowed) => assert_eq!(allowed, vec![Method::GET]),
            other => panic!("expected method not allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_prefix_applies() {
        let mut table = RouteTable::new();
        table.register(&items_service("shop.Items").prefix("/v1")).unwrap();
        assert!(matches!(table.lookup(&Method::POST, "/v1/items"), Lookup::Found(_)));
        assert!(matches!(table.lookup(&Method::POST, "/items"), Lookup::NotFound));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let mut table = RouteTable::new();
        table.register(&items_service("shop.Items")).unwrap();
        let before = table.len();
        let err = table.register(&items_service("shop.Items").prefix("/v2")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateService { .. }));
        assert_eq!(table.len(), before);
    }

    #[test]
    fn test_duplicate_route_leaves_table_unchanged() {
        let mut table = RouteTable::new();
        table.register(&items_service("shop.Items")).unwrap();
        let clash = ServiceDescriptor::new("shop.Other")
            .method(MethodDescriptor::new("Fresh", Verb::Get, "/fresh", echo()))
            .method(MethodDescriptor::new("Clash", Verb::Post, "/items", echo()));
        let err = table.register(&clash).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRoute { .. }));
        assert!(!table.contains_service("shop.Other"));
        assert!(matches!(table.lookup(&Method::GET, "/fresh"), Lookup::NotFound));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_stream_collides_with_get() {
        let mut table = RouteTable::new();
        table.register(&items_service("shop.Items")).unwrap();
        let handler = stream_fn(|_ctx, _stream| async move { Ok(()) });
        let streams = ServiceDescriptor::new("shop.Watch").stream(StreamDescriptor::new("Watch", "/items/{id}", handler));
        assert!(matches!(table.register(&streams), Err(ConfigError::DuplicateRoute { .. })));
    }

    #[test]
    fn test_missing_verb_and_direction() {
        let mut method = MethodDescriptor::new("NoVerb", Verb::Get, "/x", echo());
        method.verb = None;
        let mut table = RouteTable::new();
        assert!(matches!(table.register(&ServiceDescriptor::new("a.B").method(method)), Err(ConfigError::MissingVerb { .. })));

        let handler = stream_fn(|_ctx, _stream| async move { Ok(()) });
        let stream = StreamDescriptor::new("Idle", "/idle", handler).directions(false, false);
        assert!(matches!(table.register(&ServiceDescriptor::new("a.C").stream(stream)), Err(ConfigError::NoStreamDirection { .. })));
        assert!(table.is_empty());
    }

    #[test]
    fn test_path_field_must_match_template() {
        let method = MethodDescriptor::new("Get", Verb::Get, "/things/{name}", echo())
            .request(MessageSchema::new("GetThing").field(FieldSchema::new("id", FieldKind::String).in_path("id")));
        let mut table = RouteTable::new();
        match table.register(&ServiceDescriptor::new("a.Things").method(method)) {
            Err(ConfigError::UnknownPathParam { field, param, .. }) => {
                assert_eq!(field, "id");
                assert_eq!(param, "id");
            }
            other => panic!("expected UnknownPathParam, got {:?}", other),
        }
    }
}
