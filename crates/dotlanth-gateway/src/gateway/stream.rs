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

//! WebSocket stream bridge
//!
//! A stream route answers a GET with a WebSocket upgrade. The handler then
//! owns a [`ServerStream`]: every `send` becomes one text frame and every
//! text or binary frame from the client is one `recv`. The bridge keeps the
//! socket itself: a reader task forwards inbound frames and the connection
//! task writes outbound ones, so the handler can be closed out with a close
//! frame that carries its final status.

use super::handler::CallContext;
use super::interceptor::{StreamInterceptor, StreamNext, StreamServerInfo};
use super::router::StreamRoute;
use super::status::Status;
use super::transport::{TransportContext, TransportError};
use super::{ErrorMapper, GatewayBody};
use crate::config::GatewayConfig;
use crate::error::StreamError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Close frame reasons are limited to 123 bytes
const MAX_CLOSE_REASON: usize = 123;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

enum Inbound {
    Frame(Vec<u8>),
    Closed,
    Failed(tungstenite::Error),
}

struct Outbound {
    message: Message,
    ack: oneshot::Sender<Result<(), StreamError>>,
}

/// Duplex message stream handed to a stream handler
pub struct ServerStream {
    ctx: CallContext,
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<Inbound>,
    peer_gone: Arc<AtomicBool>,
    finished: bool,
}

impl ServerStream {
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Encode `message` as JSON and send it as one text frame
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), StreamError> {
        let text = serde_json::to_string(message).map_err(StreamError::Encode)?;
        if self.ctx.is_cancelled() || self.peer_gone.load(Ordering::SeqCst) {
            return Err(self.interrupted());
        }

        let (ack, done) = oneshot::channel();
        if self.outbound.send(Outbound { message: Message::Text(text), ack }).await.is_err() {
            return Err(StreamError::Closed);
        }
        tokio::select! {
            biased;
            result = done => result.unwrap_or(Err(StreamError::Closed)),
            _ = self.ctx.cancelled() => Err(self.interrupted()),
        }
    }

    /// Next message from the client; `Ok(None)` once the client closed the stream
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, StreamError> {
        if self.finished {
            return Ok(None);
        }
        let next = tokio::select! {
            biased;
            next = self.inbound.recv() => next,
            _ = self.ctx.cancelled() => return Err(self.interrupted()),
        };
        match next {
            Some(Inbound::Frame(data)) => {
                counter!("gateway_stream_frames_received_total", 1);
                serde_json::from_slice(&data).map(Some).map_err(StreamError::Decode)
            }
            Some(Inbound::Closed) => {
                self.finished = true;
                Ok(None)
            }
            Some(Inbound::Failed(err)) => Err(StreamError::Transport(err)),
            // The reader cancels the call before it lets go of the channel
            None => Err(self.interrupted()),
        }
    }

    /// Headers cannot follow an upgrade; accepted and ignored
    pub fn set_header(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.ctx.set_header(md)
    }

    pub fn send_header(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.ctx.send_header(md)
    }

    pub fn set_trailer(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.ctx.set_trailer(md)
    }

    fn interrupted(&self) -> StreamError {
        if self.peer_gone.load(Ordering::SeqCst) { StreamError::Closed } else { StreamError::Cancelled }
    }
}

/// Upgrades stream routes and drives their connections
#[derive(Clone)]
pub struct StreamBridge {
    config: Arc<GatewayConfig>,
    interceptors: Arc<[Arc<dyn StreamInterceptor>]>,
    mapper: ErrorMapper,
    shutdown: CancellationToken,
}

impl StreamBridge {
    pub fn new(config: Arc<GatewayConfig>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            interceptors: Arc::from(Vec::new()),
            mapper: ErrorMapper::new(),
            shutdown,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn StreamInterceptor>) -> Self {
        let mut chain = self.interceptors.to_vec();
        chain.push(interceptor);
        self.interceptors = chain.into();
        self
    }

    /// Answer the upgrade and spawn the connection task
    pub fn upgrade<B>(&self, route: Arc<StreamRoute>, mut request: Request<B>, peer_addr: &str) -> Response<GatewayBody> {
        if !hyper_tungstenite::is_upgrade_request(&request) {
            return self.upgrade_failure("request is not a websocket upgrade");
        }

        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_message_size),
            ..Default::default()
        };
        let (response, websocket) = match hyper_tungstenite::upgrade(&mut request, Some(ws_config)) {
            Ok(upgraded) => upgraded,
            Err(e) => return self.upgrade_failure(&e.to_string()),
        };

        let transport = Arc::new(TransportContext::new(route.full_method.clone(), peer_addr));
        transport.mark_upgraded();
        let ctx = CallContext::new(transport, request.headers().clone(), self.shutdown.child_token());

        let bridge = self.clone();
        tokio::spawn(async move {
            match websocket.await {
                Ok(socket) => bridge.serve_socket(route, ctx, socket).await,
                Err(e) => warn!("WebSocket handshake for {} failed: {}", route.full_method, e),
            }
        });

        response.map(|body| body.boxed())
    }

    fn upgrade_failure(&self, reason: &str) -> Response<GatewayBody> {
        debug!("Rejecting stream request: {}", reason);
        self.mapper.error_response(&Status::unknown(reason).with_http_status(hyper::StatusCode::BAD_REQUEST))
    }

    /// Run the handler of `route` over an established socket until it returns
    pub async fn serve_socket<S>(&self, route: Arc<StreamRoute>, ctx: CallContext, socket: S)
    where
        S: Sink<Message, Error = tungstenite::Error> + Stream<Item = Result<Message, tungstenite::Error>> + Send + 'static,
    {
        let connection_id = Uuid::new_v4();
        counter!("gateway_stream_connections_total", 1);
        info!("Stream {} connected: {} from {}", connection_id, route.full_method, ctx.peer());

        let (mut sink, source) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(self.config.stream_buffer_size.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(self.config.stream_buffer_size.max(1));
        let peer_gone = Arc::new(AtomicBool::new(false));
        let token = ctx.cancellation_token().clone();

        let reader = tokio::spawn(read_frames(source, inbound_tx, token.clone(), peer_gone.clone()));

        let stream = ServerStream {
            ctx: ctx.clone(),
            outbound: outbound_tx,
            inbound: inbound_rx,
            peer_gone,
            finished: false,
        };
        let info = StreamServerInfo {
            full_method: route.full_method.clone(),
            is_client_stream: route.client_streams,
            is_server_stream: route.server_streams,
        };
        let handler = StreamNext::new(&self.interceptors, route.handler.as_ref(), &info).run(ctx, stream);
        tokio::pin!(handler);

        let mut stalled = false;
        let result = loop {
            tokio::select! {
                result = &mut handler => break result,
                Some(outbound) = outbound_rx.recv() => {
                    // A peer that stops reading must not hold the connection past cancellation
                    let sent = tokio::select! {
                        sent = sink.send(outbound.message) => sent.map_err(StreamError::from),
                        _ = token.cancelled() => {
                            let _ = outbound.ack.send(Err(StreamError::Cancelled));
                            stalled = true;
                            break Err(Status::cancelled("stream write interrupted"));
                        }
                    };
                    if sent.is_ok() {
                        counter!("gateway_stream_frames_sent_total", 1);
                    }
                    let _ = outbound.ack.send(sent);
                }
            }
        };

        let frame = match &result {
            Ok(()) => CloseFrame {
                code: CloseCode::Normal,
                reason: Cow::Borrowed(""),
            },
            Err(status) => {
                warn!("Stream {} ({}) failed: {}", connection_id, route.full_method, status);
                CloseFrame {
                    code: CloseCode::Error,
                    reason: Cow::Owned(truncate(status.message(), MAX_CLOSE_REASON).to_string()),
                }
            }
        };
        if stalled {
            debug!("Stream {} stopped reading; dropping without a close frame", connection_id);
        } else {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
                Ok(Ok(())) => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                }
                Ok(Err(e)) => debug!("Stream {} could not send close frame: {}", connection_id, e),
                Err(_) => debug!("Stream {} timed out sending close frame", connection_id),
            }
        }

        token.cancel();
        reader.abort();
        info!("Stream {} closed", connection_id);
    }
}

async fn read_frames<S>(mut source: S, inbound: mpsc::Sender<Inbound>, token: CancellationToken, peer_gone: Arc<AtomicBool>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = source.next() => next,
        };
        let item = match next {
            Some(Ok(Message::Text(text))) => Inbound::Frame(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => Inbound::Frame(data),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                debug!("Client closed stream: {:?}", frame);
                peer_gone.store(true, Ordering::SeqCst);
                let _ = inbound.send(Inbound::Closed).await;
                break;
            }
            Some(Err(err)) => {
                debug!("Stream read failed: {}", err);
                peer_gone.store(true, Ordering::SeqCst);
                let _ = inbound.send(Inbound::Failed(err)).await;
                break;
            }
            None => {
                peer_gone.store(true, Ordering::SeqCst);
                let _ = inbound.send(Inbound::Failed(tungstenite::Error::ConnectionClosed)).await;
                break;
            }
        };
        if inbound.send(item).await.is_err() {
            break;
        }
    }
    token.cancel();
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MessageSchema;
    use crate::gateway::binding::{self, MessageRole};
    use crate::gateway::handler::stream_fn;
    use crate::gateway::router::PathTemplate;
    use hyper::HeaderMap;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A peer that neither reads nor writes
    struct StalledSocket;

    impl Sink<Message> for StalledSocket {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    impl Stream for StalledSocket {
        type Item = Result<Message, tungstenite::Error>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    fn route() -> Arc<StreamRoute> {
        let note = binding::resolve(&MessageSchema::new("Note"), MessageRole::Stream).unwrap();
        Arc::new(StreamRoute {
            service: "test.Streams".to_string(),
            name: "Stalled".to_string(),
            full_method: "/test.Streams/Stalled".to_string(),
            template: PathTemplate::parse("/stalled").unwrap(),
            request: note.clone(),
            response: note,
            client_streams: false,
            server_streams: true,
            handler: stream_fn(|_ctx: CallContext, stream: ServerStream| async move {
                stream.send("hello").await?;
                Ok(())
            }),
        })
    }

    #[tokio::test]
    async fn test_shutdown_releases_a_stalled_writer() {
        let shutdown = CancellationToken::new();
        let bridge = StreamBridge::new(Arc::new(GatewayConfig::default()), shutdown.clone());
        let route = route();
        let transport = Arc::new(TransportContext::new(route.full_method.clone(), "127.0.0.1:1"));
        transport.mark_upgraded();
        let ctx = CallContext::new(transport, HeaderMap::new(), shutdown.child_token());

        let serving = tokio::spawn(async move { bridge.serve_socket(route, ctx, StalledSocket).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!serving.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        let text = "é".repeat(100);
        let cut = truncate(&text, MAX_CLOSE_REASON);
        assert!(cut.len() <= MAX_CLOSE_REASON);
        assert_eq!(cut.len() % 2, 0);
    }
}
