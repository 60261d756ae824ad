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

//! Handler capability traits
//!
//! Unary methods take and return JSON values; stream methods own a
//! [`ServerStream`]. The `unary_fn` and `stream_fn` adapters let handlers
//! be written against concrete serde types instead.

use super::status::Status;
use super::stream::ServerStream;
use super::transport::{Peer, TransportContext, TransportError};
use async_trait::async_trait;
use hyper::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

/// Everything a handler can see about its call besides the message
#[derive(Debug, Clone)]
pub struct CallContext {
    transport: Arc<TransportContext>,
    request_headers: Arc<HeaderMap>,
    cancellation: CancellationToken,
}

impl CallContext {
    pub fn new(transport: Arc<TransportContext>, request_headers: HeaderMap, cancellation: CancellationToken) -> Self {
        Self {
            transport,
            request_headers: Arc::new(request_headers),
            cancellation,
        }
    }

    /// Full method name, `/service/method`
    pub fn method(&self) -> &str {
        self.transport.method()
    }

    pub fn peer(&self) -> Peer {
        self.transport.peer()
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Incoming request headers as RPC metadata
    pub fn metadata(&self) -> MetadataMap {
        MetadataMap::from_headers(self.request_headers.as_ref().clone())
    }

    pub fn set_header(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.transport.set_header(md)
    }

    pub fn send_header(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.transport.send_header(md)
    }

    pub fn set_trailer(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.transport.set_trailer(md)
    }

    pub fn transport(&self) -> &Arc<TransportContext> {
        &self.transport
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when the client goes away, the deadline passes or the server shuts down
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// A unary method over JSON values
#[async_trait]
pub trait UnaryMethod: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, request: Value) -> Result<Value, Status>;
}

/// A streaming method; it owns the send/receive loop
#[async_trait]
pub trait StreamMethod: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, stream: ServerStream) -> Result<(), Status>;
}

struct UnaryFn<F, Req, Resp> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<F, Fut, Req, Resp> UnaryMethod for UnaryFn<F, Req, Resp>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    async fn call(&self, ctx: CallContext, request: Value) -> Result<Value, Status> {
        let request: Req = serde_json::from_value(request).map_err(|e| Status::invalid_argument(format!("invalid request: {}", e)))?;
        let response = (self.f)(ctx, request).await?;
        serde_json::to_value(response).map_err(|e| Status::internal(format!("failed to encode response: {}", e)))
    }
}

/// Adapt a typed async function into a [`UnaryMethod`]
pub fn unary_fn<F, Fut, Req, Resp>(f: F) -> Arc<dyn UnaryMethod>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    Arc::new(UnaryFn { f, _types: PhantomData })
}

struct StreamFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StreamMethod for StreamFn<F>
where
    F: Fn(CallContext, ServerStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, stream: ServerStream) -> Result<(), Status> {
        (self.f)(ctx, stream).await
    }
}

/// Adapt an async function into a [`StreamMethod`]
pub fn stream_fn<F, Fut>(f: F) -> Arc<dyn StreamMethod>
where
    F: Fn(CallContext, ServerStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    Arc::new(StreamFn { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Echo {
        text: String,
    }

    #[derive(Serialize)]
    struct EchoReply {
        text: String,
        length: usize,
    }

    fn context() -> CallContext {
        let transport = Arc::new(TransportContext::new("/test.Echo/Say", "127.0.0.1:1"));
        CallContext::new(transport, HeaderMap::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_unary_fn_typed_round_trip() {
        let handler = unary_fn(|_ctx, req: Echo| async move {
            Ok(EchoReply {
                length: req.text.len(),
                text: req.text,
            })
        });
        let reply = handler.call(context(), json!({"text": "hi", "unknown": 1})).await.unwrap();
        assert_eq!(reply, json!({"text": "hi", "length": 2}));
    }

    #[tokio::test]
    async fn test_unary_fn_bad_request() {
        let handler = unary_fn(|_ctx, req: Echo| async move { Ok(json!({"text": req.text})) });
        let err = handler.call(context(), json!({"text": 5})).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_context_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer t".parse().unwrap());
        let transport = Arc::new(TransportContext::new("/test.Echo/Say", "10.1.1.1:99"));
        let ctx = CallContext::new(transport, headers, CancellationToken::new());
        assert_eq!(ctx.metadata().get("authorization").unwrap(), "Bearer t");
        assert_eq!(ctx.peer().port, 99);
        assert_eq!(ctx.method(), "/test.Echo/Say");
        assert!(!ctx.is_cancelled());
        ctx.cancellation_token().cancel();
        ctx.cancelled().await;
    }
}
