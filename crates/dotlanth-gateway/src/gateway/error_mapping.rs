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

//! Error code mapping between RPC status codes and HTTP

use super::status::{Status, StatusPayload};
use super::{GatewayBody, full_body};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use tonic::Code;
use tracing::{error, warn};

/// Nginx's "client closed request", used for cancelled calls
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Maps call statuses to HTTP responses and back
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorMapper;

impl ErrorMapper {
    pub fn new() -> Self {
        Self
    }

    /// HTTP status for a canonical code
    pub fn code_to_http(&self, code: Code) -> StatusCode {
        match code {
            Code::Ok => StatusCode::OK,
            Code::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT),
            Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::FailedPrecondition => StatusCode::BAD_REQUEST,
            Code::Aborted => StatusCode::CONFLICT,
            Code::OutOfRange => StatusCode::BAD_REQUEST,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    /// HTTP status for a call status; an explicit override wins over the code table
    pub fn to_http_status(&self, status: &Status) -> StatusCode {
        status.http_status().unwrap_or_else(|| self.code_to_http(status.code()))
    }

    /// Best-effort reverse mapping for clients reading gateway responses
    pub fn from_http_status(&self, http_status: StatusCode, message: Option<String>) -> Status {
        let msg = message.unwrap_or_else(|| http_status.canonical_reason().unwrap_or("HTTP error").to_string());

        match http_status.as_u16() {
            200..=299 => Status::ok(msg),
            400 => Status::invalid_argument(msg),
            401 => Status::unauthenticated(msg),
            403 => Status::permission_denied(msg),
            404 => Status::not_found(msg),
            409 => Status::aborted(msg),
            413 | 429 => Status::resource_exhausted(msg),
            CLIENT_CLOSED_REQUEST => Status::cancelled(msg),
            501 => Status::unimplemented(msg),
            502..=503 => Status::unavailable(msg),
            504 => Status::deadline_exceeded(msg),
            500 => Status::internal(msg),
            _ => {
                warn!("Unmapped HTTP status code: {}", http_status);
                Status::unknown(format!("HTTP {}: {}", http_status.as_u16(), msg))
            }
        }
    }

    pub fn to_status_payload(&self, status: &Status) -> StatusPayload {
        status.to_payload()
    }

    /// HTTP status and JSON body for a failed call
    pub fn render(&self, status: &Status) -> (StatusCode, Bytes) {
        let body = match serde_json::to_vec(&self.to_status_payload(status)) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!("Failed to serialize status payload: {}", e);
                Bytes::from_static(br#"{"code":13,"message":"failed to marshal error message"}"#)
            }
        };
        (self.to_http_status(status), body)
    }

    /// Complete error response for failures outside a call, such as route misses
    pub fn error_response(&self, status: &Status) -> Response<GatewayBody> {
        let (code, body) = self.render(status);
        let mut response = Response::new(full_body(body));
        *response.status_mut() = code;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_code_table() {
        let mapper = ErrorMapper::new();
        assert_eq!(mapper.code_to_http(Code::Ok), StatusCode::OK);
        assert_eq!(mapper.code_to_http(Code::Cancelled).as_u16(), 499);
        assert_eq!(mapper.code_to_http(Code::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(mapper.code_to_http(Code::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(mapper.code_to_http(Code::FailedPrecondition), StatusCode::BAD_REQUEST);
        assert_eq!(mapper.code_to_http(Code::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(mapper.code_to_http(Code::DeadlineExceeded), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(mapper.code_to_http(Code::DataLoss), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_override_wins() {
        let mapper = ErrorMapper::new();
        let status = Status::failed_precondition("stale").with_http_status(StatusCode::PRECONDITION_FAILED);
        assert_eq!(mapper.to_http_status(&status), StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn test_reverse_mapping() {
        let mapper = ErrorMapper::new();
        assert_eq!(mapper.from_http_status(StatusCode::NOT_FOUND, None).code(), Code::NotFound);
        assert_eq!(mapper.from_http_status(StatusCode::GATEWAY_TIMEOUT, None).code(), Code::DeadlineExceeded);
        assert_eq!(mapper.from_http_status(StatusCode::IM_A_TEAPOT, None).code(), Code::Unknown);
    }

    #[tokio::test]
    async fn test_error_response() {
        let mapper = ErrorMapper::new();
        let response = mapper.error_response(&Status::not_found("missing"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let payload: StatusPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, Code::NotFound as i32);
        assert_eq!(payload.message, "missing");
    }
}
