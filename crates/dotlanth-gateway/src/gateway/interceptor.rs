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

//! Interceptor chains
//!
//! Interceptors run in registration order. Each one receives a `Next`
//! continuation that invokes the rest of the chain and finally the handler;
//! it may transform the input, skip the continuation or call it several
//! times.

use super::handler::{CallContext, StreamMethod, UnaryMethod};
use super::status::Status;
use super::stream::ServerStream;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryServerInfo {
    pub full_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamServerInfo {
    pub full_method: String,
    pub is_client_stream: bool,
    pub is_server_stream: bool,
}

#[async_trait]
pub trait UnaryInterceptor: Send + Sync + 'static {
    async fn intercept(&self, ctx: CallContext, request: Value, info: &UnaryServerInfo, next: UnaryNext<'_>) -> Result<Value, Status>;
}

#[async_trait]
pub trait StreamInterceptor: Send + Sync + 'static {
    async fn intercept(&self, ctx: CallContext, stream: ServerStream, info: &StreamServerInfo, next: StreamNext<'_>) -> Result<(), Status>;
}

/// The remainder of a unary chain
#[derive(Clone, Copy)]
pub struct UnaryNext<'a> {
    chain: &'a [Arc<dyn UnaryInterceptor>],
    handler: &'a dyn UnaryMethod,
    info: &'a UnaryServerInfo,
}

impl<'a> UnaryNext<'a> {
    pub fn new(chain: &'a [Arc<dyn UnaryInterceptor>], handler: &'a dyn UnaryMethod, info: &'a UnaryServerInfo) -> Self {
        Self { chain, handler, info }
    }

    pub async fn run(self, ctx: CallContext, request: Value) -> Result<Value, Status> {
        match self.chain.split_first() {
            Some((first, rest)) => first.intercept(ctx, request, self.info, UnaryNext { chain: rest, ..self }).await,
            None => self.handler.call(ctx, request).await,
        }
    }
}

/// The remainder of a stream chain
#[derive(Clone, Copy)]
pub struct StreamNext<'a> {
    chain: &'a [Arc<dyn StreamInterceptor>],
    handler: &'a dyn StreamMethod,
    info: &'a StreamServerInfo,
}

impl<'a> StreamNext<'a> {
    pub fn new(chain: &'a [Arc<dyn StreamInterceptor>], handler: &'a dyn StreamMethod, info: &'a StreamServerInfo) -> Self {
        Self { chain, handler, info }
    }

    pub async fn run(self, ctx: CallContext, stream: ServerStream) -> Result<(), Status> {
        match self.chain.split_first() {
            Some((first, rest)) => first.intercept(ctx, stream, self.info, StreamNext { chain: rest, ..self }).await,
            None => self.handler.call(ctx, stream).await,
        }
    }
}

struct UnaryInterceptorFn<F>(F);

#[async_trait]
impl<F> UnaryInterceptor for UnaryInterceptorFn<F>
where
    F: for<'a> Fn(CallContext, Value, &'a UnaryServerInfo, UnaryNext<'a>) -> BoxFuture<'a, Result<Value, Status>> + Send + Sync + 'static,
{
    async fn intercept(&self, ctx: CallContext, request: Value, info: &UnaryServerInfo, next: UnaryNext<'_>) -> Result<Value, Status> {
        (self.0)(ctx, request, info, next).await
    }
}

/// Adapt a closure returning a boxed future into a [`UnaryInterceptor`]
pub fn unary_interceptor_fn<F>(f: F) -> Arc<dyn UnaryInterceptor>
where
    F: for<'a> Fn(CallContext, Value, &'a UnaryServerInfo, UnaryNext<'a>) -> BoxFuture<'a, Result<Value, Status>> + Send + Sync + 'static,
{
    Arc::new(UnaryInterceptorFn(f))
}

struct StreamInterceptorFn<F>(F);

#[async_trait]
impl<F> StreamInterceptor for StreamInterceptorFn<F>
where
    F: for<'a> Fn(CallContext, ServerStream, &'a StreamServerInfo, StreamNext<'a>) -> BoxFuture<'a, Result<(), Status>> + Send + Sync + 'static,
{
    async fn intercept(&self, ctx: CallContext, stream: ServerStream, info: &StreamServerInfo, next: StreamNext<'_>) -> Result<(), Status> {
        (self.0)(ctx, stream, info, next).await
    }
}

/// Adapt a closure returning a boxed future into a [`StreamInterceptor`]
pub fn stream_interceptor_fn<F>(f: F) -> Arc<dyn StreamInterceptor>
where
    F: for<'a> Fn(CallContext, ServerStream, &'a StreamServerInfo, StreamNext<'a>) -> BoxFuture<'a, Result<(), Status>> + Send + Sync + 'static,
{
    Arc::new(StreamInterceptorFn(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::handler::unary_fn;
    use crate::gateway::transport::TransportContext;
    use hyper::HeaderMap;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn context() -> CallContext {
        let transport = Arc::new(TransportContext::new("/test.Svc/Call", "127.0.0.1:1"));
        CallContext::new(transport, HeaderMap::new(), CancellationToken::new())
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl UnaryInterceptor for Record {
        async fn intercept(&self, ctx: CallContext, request: Value, info: &UnaryServerInfo, next: UnaryNext<'_>) -> Result<Value, Status> {
            self.log.lock().push(format!("{} before {}", self.name, info.full_method));
            let result = next.run(ctx, request).await;
            self.log.lock().push(format!("{} after", self.name));
            result
        }
    }

    struct Deny;

    #[async_trait]
    impl UnaryInterceptor for Deny {
        async fn intercept(&self, _ctx: CallContext, _request: Value, _info: &UnaryServerInfo, _next: UnaryNext<'_>) -> Result<Value, Status> {
            Err(Status::permission_denied("denied"))
        }
    }

    struct Retry;

    #[async_trait]
    impl UnaryInterceptor for Retry {
        async fn intercept(&self, ctx: CallContext, request: Value, _info: &UnaryServerInfo, next: UnaryNext<'_>) -> Result<Value, Status> {
            match next.run(ctx.clone(), request.clone()).await {
                Err(status) if status.code() == tonic::Code::Unavailable => next.run(ctx, request).await,
                other => other,
            }
        }
    }

    fn info() -> UnaryServerInfo {
        UnaryServerInfo {
            full_method: "/test.Svc/Call".into(),
        }
    }

    #[tokio::test]
    async fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn UnaryInterceptor>> = vec![
            Arc::new(Record { name: "outer", log: log.clone() }),
            Arc::new(Record { name: "inner", log: log.clone() }),
        ];
        let handler_log = log.clone();
        let handler = unary_fn(move |_ctx, req: Value| {
            let log = handler_log.clone();
            async move {
                log.lock().push("handler".to_string());
                Ok(req)
            }
        });
        let info = info();
        let reply = UnaryNext::new(&chain, handler.as_ref(), &info).run(context(), json!({"n": 1})).await.unwrap();
        assert_eq!(reply, json!({"n": 1}));
        assert_eq!(
            *log.lock(),
            vec![
                "outer before /test.Svc/Call".to_string(),
                "inner before /test.Svc/Call".to_string(),
                "handler".to_string(),
                "inner after".to_string(),
                "outer after".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = unary_fn(move |_ctx, req: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(req) }
        });
        let chain: Vec<Arc<dyn UnaryInterceptor>> = vec![Arc::new(Deny)];
        let info = info();
        let err = UnaryNext::new(&chain, handler.as_ref(), &info).run(context(), json!({})).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_calls_next_twice() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = unary_fn(move |_ctx, req: Value| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move { if attempt == 0 { Err(Status::unavailable("warming up")) } else { Ok(req) } }
        });
        let chain: Vec<Arc<dyn UnaryInterceptor>> = vec![Arc::new(Retry)];
        let info = info();
        let reply = UnaryNext::new(&chain, handler.as_ref(), &info).run(context(), json!({"ok": true})).await.unwrap();
        assert_eq!(reply, json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closure_interceptor() {
        let tagger = unary_interceptor_fn(|ctx, request, _info, next| {
            Box::pin(async move {
                next.run(ctx, request).await.map(|mut reply| {
                    reply["tagged"] = json!(true);
                    reply
                })
            })
        });
        let handler = unary_fn(|_ctx, req: Value| async move { Ok(req) });
        let chain = vec![tagger];
        let info = info();
        let reply = UnaryNext::new(&chain, handler.as_ref(), &info).run(context(), json!({"a": 1})).await.unwrap();
        assert_eq!(reply, json!({"a": 1, "tagged": true}));
    }
}
