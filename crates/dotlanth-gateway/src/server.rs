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

//! Gateway server
//!
//! Owns the route table, dispatches requests to the unary dispatcher or the
//! stream bridge and runs the hyper accept loop.

use crate::config::GatewayConfig;
use crate::descriptor::ServiceDescriptor;
use crate::error::{ConfigError, GatewayError, GatewayResult};
use crate::gateway::interceptor::{StreamInterceptor, UnaryInterceptor};
use crate::gateway::router::{Lookup, RouteTable, RouteTarget};
use crate::gateway::{ErrorMapper, GatewayBody, Status, StreamBridge, UnaryDispatcher};
use crate::validation::ValidationContext;
use futures::future::BoxFuture;
use hyper::body::{Body, Bytes};
use hyper::header::{ALLOW, HeaderValue};
use hyper::server::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use metrics::counter;
use parking_lot::RwLock;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceBuilder};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// The gateway: a registry of services plus the machinery to serve them
#[derive(Clone)]
pub struct Server {
    config: Arc<GatewayConfig>,
    routes: Arc<RwLock<Arc<RouteTable>>>,
    unary: UnaryDispatcher,
    streams: StreamBridge,
    mapper: ErrorMapper,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: GatewayConfig) -> Self {
        let config = Arc::new(config);
        let shutdown = CancellationToken::new();
        Self {
            routes: Arc::new(RwLock::new(Arc::new(RouteTable::new()))),
            unary: UnaryDispatcher::new(config.clone(), shutdown.clone()),
            streams: StreamBridge::new(config.clone(), shutdown.clone()),
            mapper: ErrorMapper::new(),
            config,
            shutdown,
        }
    }

    /// Append a unary interceptor; interceptors run in the order they were added
    pub fn with_unary_interceptor(mut self, interceptor: Arc<dyn UnaryInterceptor>) -> Self {
        self.unary = self.unary.with_interceptor(interceptor);
        self
    }

    /// Append a stream interceptor; interceptors run in the order they were added
    pub fn with_stream_interceptor(mut self, interceptor: Arc<dyn StreamInterceptor>) -> Self {
        self.streams = self.streams.with_interceptor(interceptor);
        self
    }

    pub fn with_validation(mut self, validation: ValidationContext) -> Self {
        self.unary = self.unary.with_validation(validation);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Register a service. Either every route of the service is added or none is.
    pub fn register_service(&self, service: ServiceDescriptor) -> Result<(), ConfigError> {
        let mut routes = self.routes.write();
        let mut next = RouteTable::clone(&routes);
        next.register(&service)?;
        *routes = Arc::new(next);
        info!(
            "Registered service {} ({} methods, {} streams)",
            service.name,
            service.methods.len(),
            service.streams.len()
        );
        Ok(())
    }

    /// Snapshot of the current route table
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    /// Serve one HTTP request
    pub async fn handle<B>(&self, request: Request<B>, peer_addr: &str) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let routes = self.routes();
        let path = request.uri().path().to_string();

        match routes.lookup(request.method(), &path) {
            Lookup::Found(found) => match found.target {
                RouteTarget::Unary(route) => self.unary.dispatch(route, found.params, request, peer_addr).await,
                RouteTarget::Stream(route) => self.streams.upgrade(route, request, peer_addr),
            },
            Lookup::MethodNotAllowed(allowed) => {
                counter!("gateway_route_misses_total", 1);
                debug!("Method {} not allowed for {}", request.method(), path);
                let status = Status::unimplemented(format!("method {} is not allowed for {}", request.method(), path)).with_http_status(StatusCode::METHOD_NOT_ALLOWED);
                let mut response = self.mapper.error_response(&status);
                let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                if let Ok(allow) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(ALLOW, allow);
                }
                response
            }
            Lookup::NotFound => {
                counter!("gateway_route_misses_total", 1);
                debug!("No route for {} {}", request.method(), path);
                self.mapper.error_response(&Status::not_found(format!("no route for {}", path)))
            }
        }
    }

    /// Bind the configured address and serve until [`Server::shutdown`]
    pub async fn run(&self) -> GatewayResult<()> {
        let addr: SocketAddr = self.config.bind_address.parse().map_err(|e: std::net::AddrParseError| GatewayError::InvalidBindAddress {
            address: self.config.bind_address.clone(),
            reason: e.to_string(),
        })?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from `listener` until [`Server::shutdown`]
    pub async fn serve(&self, listener: TcpListener) -> GatewayResult<()> {
        info!("Dotlanth gateway listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Gateway shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let service = ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .service(GatewayService::new(self.clone(), remote_addr));
            let service = TowerToHyperService::new(service);
            let shutdown = self.shutdown.clone();

            tokio::task::spawn(async move {
                let connection = http1::Builder::new().serve_connection(io, service).with_upgrades();
                tokio::pin!(connection);
                tokio::select! {
                    result = connection.as_mut() => {
                        if let Err(err) = result {
                            debug!("Error serving connection from {}: {}", remote_addr, err);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        connection.as_mut().graceful_shutdown();
                        if let Err(err) = connection.as_mut().await {
                            debug!("Error closing connection from {}: {}", remote_addr, err);
                        }
                    }
                }
            });
        }
    }

    /// Stop accepting connections and cancel every live call
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// A [`Server`] bound to one connection, as a tower service
#[derive(Clone)]
pub struct GatewayService {
    server: Server,
    peer_addr: Arc<str>,
}

impl GatewayService {
    pub fn new(server: Server, remote_addr: SocketAddr) -> Self {
        Self {
            server,
            peer_addr: Arc::from(remote_addr.to_string()),
        }
    }
}

impl<B> Service<Request<B>> for GatewayService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Response = Response<GatewayBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let server = self.server.clone();
        let peer_addr = self.peer_addr.clone();
        Box::pin(async move { Ok(server.handle(request, &peer_addr).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{MethodDescriptor, Verb};
    use crate::gateway::unary_fn;
    use http_body_util::{BodyExt, Empty};
    use serde_json::Value;

    fn service(name: &str, path: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name).method(MethodDescriptor::new("Ping", Verb::Get, path, unary_fn(|_ctx, req: Value| async move { Ok(req) })))
    }

    async fn json(response: Response<GatewayBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_failed_registration_keeps_previous_table() {
        let server = Server::new(GatewayConfig::default());
        server.register_service(service("a.Ping", "/ping")).unwrap();
        let before = server.routes();

        let err = server.register_service(service("b.Ping", "/ping")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRoute { .. }));
        assert!(Arc::ptr_eq(&before, &server.routes()));
        assert!(!server.routes().contains_service("b.Ping"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let server = Server::new(GatewayConfig::default());
        let request = Request::get("/missing").body(Empty::<Bytes>::new()).unwrap();
        let response = server.handle(request, "127.0.0.1:9000").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["code"], 5);
    }

    #[tokio::test]
    async fn test_wrong_method_lists_allowed_methods() {
        let server = Server::new(GatewayConfig::default());
        server.register_service(service("a.Ping", "/ping")).unwrap();

        let request = Request::delete("/ping").body(Empty::<Bytes>::new()).unwrap();
        let response = server.handle(request, "127.0.0.1:9000").await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET");
        assert_eq!(json(response).await["code"], 12);
    }

    #[tokio::test]
    async fn test_bad_bind_address() {
        let server = Server::new(GatewayConfig {
            bind_address: "not an address".to_string(),
            ..Default::default()
        });
        assert!(matches!(server.run().await, Err(GatewayError::InvalidBindAddress { .. })));
    }
}
