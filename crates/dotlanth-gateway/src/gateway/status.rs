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

//! Handler-facing call status
//!
//! A [`Status`] carries a canonical RPC code, a message, optional JSON
//! details and an optional explicit HTTP status that takes precedence over
//! the code table in [`super::ErrorMapper`].

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use tonic::Code;

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    code: Code,
    message: String,
    details: Vec<Value>,
    http_status: Option<StatusCode>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
            http_status: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Code::Ok, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(Code::OutOfRange, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(Code::DataLoss, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// Attach a structured detail to the status payload
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.details.push(detail);
        self
    }

    /// Force the HTTP status written for this error
    pub fn with_http_status(mut self, status: StatusCode) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &[Value] {
        &self.details
    }

    pub fn http_status(&self) -> Option<StatusCode> {
        self.http_status
    }

    /// Canonical status for an arbitrary error.
    ///
    /// Walks the source chain looking for a wrapped [`Status`] or
    /// [`tonic::Status`]; timeouts and broken I/O get their matching codes;
    /// anything else is `UNKNOWN` with the error's message.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Status {
        let mut current = Some(err);
        while let Some(err) = current {
            if let Some(status) = err.downcast_ref::<Status>() {
                return status.clone();
            }
            if let Some(status) = err.downcast_ref::<tonic::Status>() {
                return Status::from(status.clone());
            }
            if err.is::<tokio::time::error::Elapsed>() {
                return Status::deadline_exceeded(err.to_string());
            }
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                match io_err.kind() {
                    io::ErrorKind::TimedOut => return Status::deadline_exceeded(io_err.to_string()),
                    io::ErrorKind::UnexpectedEof => return Status::internal(io_err.to_string()),
                    _ => {}
                }
            }
            current = err.source();
        }
        Status::unknown(err.to_string())
    }

    pub fn to_payload(&self) -> StatusPayload {
        StatusPayload {
            code: self.code as i32,
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl StdError for Status {}

impl From<tonic::Status> for Status {
    fn from(status: tonic::Status) -> Self {
        Status::new(status.code(), status.message())
    }
}

impl From<Status> for tonic::Status {
    fn from(status: Status) -> Self {
        tonic::Status::new(status.code, status.message)
    }
}

impl From<anyhow::Error> for Status {
    fn from(err: anyhow::Error) -> Self {
        Status::from_error(&*err)
    }
}

/// JSON error payload written for failed calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub details: Vec<Value>,
}

impl From<StatusPayload> for Status {
    fn from(payload: StatusPayload) -> Self {
        Status {
            code: Code::from(payload.code),
            message: payload.message,
            details: payload.details,
            http_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Wrapper(Status);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_from_error_finds_wrapped_status() {
        let err = Wrapper(Status::not_found("no such item"));
        let status = Status::from_error(&err);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such item");
    }

    #[test]
    fn test_from_error_unknown() {
        let err = io::Error::new(io::ErrorKind::Other, "boom");
        let status = Status::from_error(&err);
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "boom");
    }

    #[test]
    fn test_from_error_eof() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(Status::from_error(&err).code(), Code::Internal);

        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(Status::from_error(&err).code(), Code::Unknown);
    }

    #[test]
    fn test_from_anyhow() {
        let err = anyhow::Error::new(Status::permission_denied("nope")).context("while loading");
        let status = Status::from(err);
        assert_eq!(status.code(), Code::PermissionDenied);

        let status = Status::from(anyhow::anyhow!("plain failure"));
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "plain failure");
    }

    #[test]
    fn test_tonic_conversion() {
        let status = Status::from(tonic::Status::already_exists("dup"));
        assert_eq!(status.code(), Code::AlreadyExists);
        let back: tonic::Status = status.into();
        assert_eq!(back.message(), "dup");
    }

    #[test]
    fn test_payload() {
        let status = Status::invalid_argument("bad id").with_detail(json!({"field": "id"}));
        let payload = status.to_payload();
        assert_eq!(payload.code, 3);
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({"code": 3, "message": "bad id", "details": [{"field": "id"}]}));
        assert_eq!(Status::from(payload).code(), Code::InvalidArgument);
    }
}
