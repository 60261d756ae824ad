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

//! Per-call transport state
//!
//! Tracks the peer of a call, the response headers a handler sets before
//! the response starts and the trailer it accumulates until the call ends.

use hyper::HeaderMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport: the stream is done or headers were already sent")]
    LateWrite,
}

/// Remote end of a call. Parts that fail to parse stay empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Peer {
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl Peer {
    /// Parse `host:port`, `[v6]:port` or a bare host. Host and port are parsed independently.
    pub fn parse(addr: &str) -> Self {
        let (host, port) = split_host_port(addr);
        Self {
            ip: host.and_then(|h| h.parse().ok()),
            port: port.and_then(|p| p.parse().ok()).unwrap_or(0),
        }
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket_addr() {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "unknown:{}", self.port),
        }
    }
}

fn split_host_port(addr: &str) -> (Option<&str>, Option<&str>) {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (Some(host), tail.strip_prefix(':')),
            None => (None, None),
        };
    }
    match addr.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 host
        Some((host, _)) if host.contains(':') => (Some(addr), None),
        Some((host, port)) => (Some(host), Some(port)),
        None => (Some(addr), None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Headers may still change
    Open,
    /// The response has started
    Sent,
    /// The connection was handed to a WebSocket; header writes are ignored
    Upgraded,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    headers: HeaderMap,
    trailer: HeaderMap,
    trailer_flushed: bool,
}

/// Transport-level state of one call
#[derive(Debug)]
pub struct TransportContext {
    method: String,
    peer: Peer,
    state: Mutex<State>,
}

impl TransportContext {
    pub fn new(method: impl Into<String>, peer_addr: &str) -> Self {
        Self {
            method: method.into(),
            peer: Peer::parse(peer_addr),
            state: Mutex::new(State {
                phase: Phase::Open,
                headers: HeaderMap::new(),
                trailer: HeaderMap::new(),
                trailer_flushed: false,
            }),
        }
    }

    /// Full method name of the call
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Add response headers. Fails once the response has started.
    pub fn set_header(&self, md: MetadataMap) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Open => {
                append_all(&mut state.headers, md.into_headers());
                Ok(())
            }
            Phase::Upgraded => {
                debug!("Ignoring header write on upgraded call {}", self.method);
                Ok(())
            }
            Phase::Sent => Err(TransportError::LateWrite),
        }
    }

    /// Identical to [`TransportContext::set_header`]; headers go out with the response
    pub fn send_header(&self, md: MetadataMap) -> Result<(), TransportError> {
        self.set_header(md)
    }

    /// Merge into the trailer. Ignored once the trailer was flushed.
    pub fn set_trailer(&self, md: MetadataMap) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.phase == Phase::Upgraded {
            return Ok(());
        }
        if state.trailer_flushed {
            return Err(TransportError::LateWrite);
        }
        append_all(&mut state.trailer, md.into_headers());
        Ok(())
    }

    /// Start the response and take the accumulated headers
    pub fn begin_response(&self) -> HeaderMap {
        let mut state = self.state.lock();
        if state.phase == Phase::Open {
            state.phase = Phase::Sent;
        }
        std::mem::take(&mut state.headers)
    }

    pub fn is_sent(&self) -> bool {
        self.state.lock().phase != Phase::Open
    }

    /// Switch to upgraded mode; header and trailer writes become no-ops
    pub fn mark_upgraded(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Upgraded;
        state.headers.clear();
    }

    /// The trailer, exactly once
    pub fn flush_trailer(&self) -> Option<HeaderMap> {
        let mut state = self.state.lock();
        if state.trailer_flushed {
            return None;
        }
        state.trailer_flushed = true;
        Some(std::mem::take(&mut state.trailer))
    }
}

fn append_all(target: &mut HeaderMap, source: HeaderMap) {
    let mut last = None;
    for (name, value) in source {
        if let Some(name) = name {
            last = Some(name);
        }
        if let Some(name) = &last {
            target.append(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(pairs: &[(&'static str, &'static str)]) -> MetadataMap {
        let mut md = MetadataMap::new();
        for (k, v) in pairs {
            md.append(*k, v.parse().unwrap());
        }
        md
    }

    #[test]
    fn test_headers_until_sent() {
        let ctx = TransportContext::new("/svc/Method", "127.0.0.1:5000");
        ctx.set_header(md(&[("x-one", "1")])).unwrap();
        ctx.send_header(md(&[("x-one", "2")])).unwrap();
        let headers = ctx.begin_response();
        assert_eq!(headers.get_all("x-one").iter().count(), 2);
        assert!(ctx.is_sent());
        assert_eq!(ctx.set_header(md(&[("x-late", "1")])), Err(TransportError::LateWrite));
    }

    #[test]
    fn test_trailer_merges_and_flushes_once() {
        let ctx = TransportContext::new("/svc/Method", "127.0.0.1:5000");
        ctx.set_trailer(md(&[("x-a", "1")])).unwrap();
        let _ = ctx.begin_response();
        ctx.set_trailer(md(&[("x-b", "2")])).unwrap();
        let trailer = ctx.flush_trailer().unwrap();
        assert_eq!(trailer.get("x-a").unwrap(), "1");
        assert_eq!(trailer.get("x-b").unwrap(), "2");
        assert!(ctx.flush_trailer().is_none());
        assert_eq!(ctx.set_trailer(md(&[("x-c", "3")])), Err(TransportError::LateWrite));
    }

    #[test]
    fn test_upgraded_writes_are_noops() {
        let ctx = TransportContext::new("/svc/Stream", "127.0.0.1:5000");
        ctx.mark_upgraded();
        assert!(ctx.set_header(md(&[("x-a", "1")])).is_ok());
        assert!(ctx.set_trailer(md(&[("x-a", "1")])).is_ok());
        assert!(ctx.begin_response().is_empty());
    }

    #[test]
    fn test_peer_parsing() {
        let peer = Peer::parse("10.0.0.1:8080");
        assert_eq!(peer.ip, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(peer.port, 8080);

        let peer = Peer::parse("[::1]:9000");
        assert_eq!(peer.ip, Some("::1".parse().unwrap()));
        assert_eq!(peer.port, 9000);

        let peer = Peer::parse("10.0.0.1:http");
        assert_eq!(peer.ip, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(peer.port, 0);

        let peer = Peer::parse("not-an-ip:443");
        assert_eq!(peer.ip, None);
        assert_eq!(peer.port, 443);

        assert_eq!(Peer::parse(""), Peer::default());
        assert_eq!(Peer::parse("::1").ip, Some("::1".parse().unwrap()));
    }
}
