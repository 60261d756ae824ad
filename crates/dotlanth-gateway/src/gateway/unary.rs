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

//! Unary dispatch: one HTTP request, one handler call, one HTTP response

use super::binding::RawRequest;
use super::error_mapping::ErrorMapper;
use super::handler::CallContext;
use super::interceptor::{UnaryInterceptor, UnaryNext, UnaryServerInfo};
use super::router::UnaryRoute;
use super::status::Status;
use super::transport::TransportContext;
use super::{GatewayBody, body_with_trailers, full_body};
use crate::config::GatewayConfig;
use crate::error::DecodeError;
use crate::validation::ValidationContext;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, HeaderValue, TE, TRAILER};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Request, Response, StatusCode};
use metrics::counter;
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::form_urlencoded;

/// Runs unary calls against registered routes
#[derive(Clone)]
pub struct UnaryDispatcher {
    config: Arc<GatewayConfig>,
    interceptors: Arc<[Arc<dyn UnaryInterceptor>]>,
    validation: Arc<ValidationContext>,
    mapper: ErrorMapper,
    shutdown: CancellationToken,
}

impl UnaryDispatcher {
    pub fn new(config: Arc<GatewayConfig>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            interceptors: Arc::from(Vec::new()),
            validation: Arc::new(ValidationContext::new()),
            mapper: ErrorMapper::new(),
            shutdown,
        }
    }

    /// Append an interceptor; it runs inside the ones added before it
    pub fn with_interceptor(mut self, interceptor: Arc<dyn UnaryInterceptor>) -> Self {
        let mut chain = self.interceptors.to_vec();
        chain.push(interceptor);
        self.interceptors = chain.into();
        self
    }

    pub fn with_validation(mut self, validation: ValidationContext) -> Self {
        self.validation = Arc::new(validation);
        self
    }

    pub async fn dispatch<B>(&self, route: Arc<UnaryRoute>, params: Vec<(String, String)>, request: Request<B>, peer_addr: &str) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        counter!("gateway_unary_requests_total", 1, "method" => route.full_method.clone());
        let transport = Arc::new(TransportContext::new(route.full_method.clone(), peer_addr));
        let (parts, body) = request.into_parts();
        let accepts_trailers = accepts_trailers(&parts.headers);

        match self.execute(&route, &params, parts, body, transport.clone()).await {
            Ok((fields, body)) => self.respond(&transport, StatusCode::OK, fields, body, accepts_trailers),
            Err(status) => {
                counter!("gateway_unary_failures_total", 1, "method" => route.full_method.clone());
                debug!("Call {} failed: {}", route.full_method, status);
                let (code, body) = self.mapper.render(&status);
                self.respond(&transport, code, HeaderMap::new(), body, accepts_trailers)
            }
        }
    }

    async fn execute<B>(&self, route: &Arc<UnaryRoute>, params: &[(String, String)], parts: Parts, body: B, transport: Arc<TransportContext>) -> Result<(HeaderMap, Bytes), Status>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let body = if route.verb.has_body() {
            Some(self.read_body(&parts.headers, body).await?)
        } else {
            None
        };

        let query: Vec<(String, String)> = parts
            .uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let raw = RawRequest {
            params,
            query: &query,
            headers: &parts.headers,
        };
        let request = route.request.decode_request(&raw, body, self.config.enum_policy())?;
        self.validation.validate(&route.request.message, &request)?;

        let ctx = CallContext::new(transport, parts.headers, self.shutdown.child_token());
        let response = self.invoke(route.clone(), ctx, request).await?;

        let (fields, body) = route.response.encode_response(response)?;
        let body = serde_json::to_vec(&body).map_err(|e| Status::internal(format!("failed to marshal response: {}", e)))?;
        Ok((fields, Bytes::from(body)))
    }

    async fn read_body<B>(&self, headers: &HeaderMap, body: B) -> Result<Map<String, Value>, DecodeError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if let Some(content_type) = headers.get(CONTENT_TYPE) {
            let raw = String::from_utf8_lossy(content_type.as_bytes()).into_owned();
            let is_json = raw
                .parse::<mime::Mime>()
                .map(|m| m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON))
                .unwrap_or(false);
            if !is_json {
                return Err(DecodeError::UnsupportedContentType(raw));
            }
        }

        let limit = self.config.max_body_size;
        let collected = Limited::new(body, limit).collect().await.map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                DecodeError::BodyTooLarge { limit }
            } else {
                DecodeError::BodyRead(e.to_string())
            }
        })?;
        let bytes = collected.to_bytes();
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(object) => Ok(object),
            _ => Err(DecodeError::BodyNotObject),
        }
    }

    /// Run the chain on its own task so a vanished client or an expired
    /// deadline only stops the wait, never the handler itself.
    async fn invoke(&self, route: Arc<UnaryRoute>, ctx: CallContext, request: Value) -> Result<Value, Status> {
        let token = ctx.cancellation_token().clone();
        // Fires when this future is dropped, e.g. by a client disconnect
        let guard = token.clone().drop_guard();
        let interceptors = self.interceptors.clone();

        let task = tokio::spawn(async move {
            let info = UnaryServerInfo {
                full_method: route.full_method.clone(),
            };
            UnaryNext::new(&interceptors, route.handler.as_ref(), &info).run(ctx, request).await
        });

        let joined = match self.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Call exceeded its {:?} deadline", limit);
                    return Err(Status::deadline_exceeded("request deadline exceeded"));
                }
            },
            None => task.await,
        };
        guard.disarm();

        joined.unwrap_or_else(|e| {
            error!("Handler task failed: {}", e);
            Err(Status::internal("handler terminated unexpectedly"))
        })
    }

    fn respond(&self, transport: &TransportContext, status: StatusCode, fields: HeaderMap, body: Bytes, accepts_trailers: bool) -> Response<GatewayBody> {
        let mut headers = transport.begin_response();
        for (name, value) in fields.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let trailer = transport.flush_trailer().unwrap_or_default();
        let body = if accepts_trailers {
            let names: Vec<&str> = trailer.keys().map(|k| k.as_str()).collect();
            if let Ok(announce) = HeaderValue::from_str(&names.join(", ")) {
                if !names.is_empty() {
                    headers.insert(TRAILER, announce);
                }
            }
            body_with_trailers(body, Some(trailer))
        } else {
            // Without trailer support the body is already complete, so the
            // trailer travels with the headers
            for (name, value) in trailer.iter() {
                headers.append(name.clone(), value.clone());
            }
            full_body(body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn accepts_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("trailers"))
}
