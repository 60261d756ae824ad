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

//! Configuration management for the gateway

use crate::gateway::convert::EnumPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the gateway server
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Unary request timeout in seconds; zero disables it
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Map unknown enum names to the enum's zero value instead of rejecting them
    pub permissive_enums: bool,

    /// Frames buffered per direction on a stream connection
    pub stream_buffer_size: usize,

    /// Largest WebSocket message accepted from a client
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_size: 4 * 1024 * 1024, // 4MB
            permissive_enums: false,
            stream_buffer_size: 32,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("DOTLANTH_GATEWAY_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            request_timeout_secs: env_parse("DOTLANTH_GATEWAY_REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs),
            max_body_size: env_parse("DOTLANTH_GATEWAY_MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            permissive_enums: env_parse("DOTLANTH_GATEWAY_PERMISSIVE_ENUMS").unwrap_or(defaults.permissive_enums),
            stream_buffer_size: env_parse("DOTLANTH_GATEWAY_STREAM_BUFFER_SIZE").unwrap_or(defaults.stream_buffer_size),
            max_message_size: env_parse("DOTLANTH_GATEWAY_MAX_MESSAGE_SIZE").unwrap_or(defaults.max_message_size),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn enum_policy(&self) -> EnumPolicy {
        if self.permissive_enums { EnumPolicy::ZeroValue } else { EnumPolicy::Strict }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
