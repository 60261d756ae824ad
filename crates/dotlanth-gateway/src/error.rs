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

//! Error types for the gateway

use crate::gateway::binding::Source;
use crate::gateway::status::Status;
use hyper::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Registration-time errors; a service that fails with one of these is not registered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service {service} is already registered")]
    DuplicateService { service: String },

    #[error("method {method} is declared twice in service {service}")]
    DuplicateMethod { service: String, method: String },

    #[error("route {verb} {path} conflicts with an existing route: {conflict}")]
    DuplicateRoute { verb: String, path: String, conflict: String },

    #[error("method {method} of service {service} has no HTTP verb")]
    MissingVerb { service: String, method: String },

    #[error("invalid path template {path}: {reason}")]
    InvalidPathTemplate { path: String, reason: String },

    #[error("stream {stream} of service {service} streams in neither direction")]
    NoStreamDirection { service: String, stream: String },

    #[error("field {field} of message {message} declares more than one source")]
    MultipleSources { message: String, field: String },

    #[error("field {field} of {role} message {message} cannot be bound to {binding}")]
    IllegalSource {
        message: String,
        field: String,
        binding: Source,
        role: &'static str,
    },

    #[error("field {field} of message {message} is not a scalar and cannot be bound to {binding}")]
    NotScalar { message: String, field: String, binding: Source },

    #[error("field {field} of message {message} has an invalid {binding} name {name:?}")]
    InvalidWireName {
        message: String,
        field: String,
        binding: Source,
        name: String,
    },

    #[error("field {field} of message {message} reuses {binding} name {name:?}")]
    DuplicateWireName {
        message: String,
        field: String,
        binding: Source,
        name: String,
    },

    #[error("field {field} of message {message} is bound to path parameter {param} which {path} does not declare")]
    UnknownPathParam {
        message: String,
        field: String,
        param: String,
        path: String,
    },
}

/// Request decoding failures; rendered to the client as a status payload
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("request body must be a JSON object")]
    BodyNotObject,

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("unsupported content type {0}")]
    UnsupportedContentType(String),

    #[error("invalid value {value:?} for {binding} field {field}: {reason}")]
    InvalidValue {
        field: String,
        binding: Source,
        value: String,
        reason: String,
    },

    #[error("unknown value {value:?} for enum field {field}")]
    UnknownEnumValue { field: String, value: String },

    #[error("missing cookie {name}")]
    MissingCookie { name: String },

    #[error("header {name} is not valid UTF-8")]
    InvalidHeaderEncoding { name: String },
}

impl From<DecodeError> for Status {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::BodyTooLarge { .. } => Status::resource_exhausted(err.to_string()).with_http_status(StatusCode::PAYLOAD_TOO_LARGE),
            DecodeError::UnsupportedContentType(_) => Status::invalid_argument(err.to_string()).with_http_status(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            DecodeError::BodyRead(_) => Status::unavailable(err.to_string()),
            _ => Status::invalid_argument(err.to_string()),
        }
    }
}

/// Errors surfaced by [`crate::gateway::ServerStream`]
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("failed to decode stream message: {0}")]
    Decode(serde_json::Error),

    #[error("failed to encode stream message: {0}")]
    Encode(serde_json::Error),

    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// True when the connection itself is unusable
    pub fn is_transport(&self) -> bool {
        matches!(self, StreamError::Transport(_) | StreamError::Closed)
    }
}

impl From<StreamError> for Status {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Transport(_) | StreamError::Closed => Status::unavailable(err.to_string()),
            StreamError::Decode(_) => Status::invalid_argument(err.to_string()),
            StreamError::Encode(_) => Status::internal(err.to_string()),
            StreamError::Cancelled => Status::cancelled(err.to_string()),
        }
    }
}

/// Server-level failures
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid bind address {address}: {reason}")]
    InvalidBindAddress { address: String, reason: String },
}

/// Result type for server operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_decode_error_status() {
        let status: Status = DecodeError::BodyTooLarge { limit: 10 }.into();
        assert_eq!(status.code(), Code::ResourceExhausted);
        assert_eq!(status.http_status(), Some(StatusCode::PAYLOAD_TOO_LARGE));

        let status: Status = DecodeError::MissingCookie { name: "session".into() }.into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "missing cookie session");
    }

    #[test]
    fn test_stream_error_kinds() {
        assert!(StreamError::Closed.is_transport());
        assert!(!StreamError::Cancelled.is_transport());
        let status: Status = StreamError::Cancelled.into();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[test]
    fn test_config_error_names_field() {
        let err = ConfigError::IllegalSource {
            message: "GetReply".into(),
            field: "id".into(),
            binding: Source::Query,
            role: "response",
        };
        let text = err.to_string();
        assert!(text.contains("id"));
        assert!(text.contains("GetReply"));
    }
}
