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

//! HTTP/WebSocket to RPC transcoding
//!
//! Routing, field binding, unary dispatch and the WebSocket stream bridge.

pub mod binding;
pub mod convert;
pub mod error_mapping;
pub mod handler;
pub mod interceptor;
pub mod router;
pub mod status;
pub mod stream;
pub mod transport;
pub mod unary;

pub use binding::{MessageBinding, MessageRole, Source};
pub use error_mapping::ErrorMapper;
pub use handler::{CallContext, StreamMethod, UnaryMethod, stream_fn, unary_fn};
pub use interceptor::{StreamInterceptor, StreamNext, StreamServerInfo, UnaryInterceptor, UnaryNext, UnaryServerInfo, stream_interceptor_fn, unary_interceptor_fn};
pub use router::{Lookup, RouteTable, RouteTarget};
pub use status::{Status, StatusPayload};
pub use stream::{ServerStream, StreamBridge};
pub use transport::{Peer, TransportContext, TransportError};
pub use unary::UnaryDispatcher;

use http_body_util::{BodyExt, Full, StreamBody, combinators::BoxBody};
use hyper::HeaderMap;
use hyper::body::{Bytes, Frame};
use std::convert::Infallible;

/// Response body type produced by the gateway
pub type GatewayBody = BoxBody<Bytes, Infallible>;

pub(crate) fn full_body(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into()).boxed()
}

/// A buffered body followed by a trailer frame when there is one
pub(crate) fn body_with_trailers(data: Bytes, trailers: Option<HeaderMap>) -> GatewayBody {
    let mut frames = vec![Ok::<_, Infallible>(Frame::data(data))];
    if let Some(trailers) = trailers.filter(|t| !t.is_empty()) {
        frames.push(Ok(Frame::trailers(trailers)));
    }
    StreamBody::new(futures::stream::iter(frames)).boxed()
}
