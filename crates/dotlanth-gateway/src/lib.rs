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

//! Dotlanth HTTP/WebSocket transcoding gateway
//!
//! This crate exposes RPC-style services (unary methods and bidirectional
//! streams) over plain HTTP/JSON and WebSocket. Services are registered at
//! runtime from [`descriptor::ServiceDescriptor`] values; every field of a
//! request or response message is bound to a path segment, query parameter,
//! header, cookie or the JSON body.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod gateway;
pub mod openapi;
pub mod server;
pub mod validation;

pub use config::GatewayConfig;
pub use descriptor::{EnumSchema, FieldAnnotations, FieldKind, FieldSchema, MessageSchema, MethodDescriptor, ServiceDescriptor, StreamDescriptor, Verb};
pub use error::{ConfigError, DecodeError, GatewayError, GatewayResult, StreamError};
pub use gateway::{CallContext, ServerStream, Status, StreamMethod, UnaryMethod, stream_fn, unary_fn};
pub use server::{GatewayService, Server};
pub use validation::ValidationContext;
