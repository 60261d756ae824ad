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

use dotlanth_gateway::gateway::{UnaryNext, UnaryServerInfo, unary_interceptor_fn};
use dotlanth_gateway::openapi::{self, ApiInfo};
use dotlanth_gateway::{
    CallContext, FieldKind, FieldSchema, GatewayConfig, MessageSchema, MethodDescriptor, Server, ServerStream, ServiceDescriptor, Status, StreamDescriptor, Verb, stream_fn,
    unary_fn,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct UnaryRequest {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    extra: String,
}

#[derive(Debug, Serialize)]
struct UnaryResponse {
    message: String,
    #[serde(rename = "testHeader")]
    test_header: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Note {
    message: String,
}

async fn unary(_ctx: CallContext, request: UnaryRequest) -> Result<UnaryResponse, Status> {
    let test_header = request.id.len() as i64;
    Ok(UnaryResponse {
        message: format!("{} {} {}", request.id, request.message, request.extra).trim().to_string(),
        test_header,
    })
}

async fn stream_response(_ctx: CallContext, stream: ServerStream) -> Result<(), Status> {
    for message in ["a", "b", "c"] {
        stream.send(&Note { message: message.to_string() }).await?;
    }
    Ok(())
}

async fn stream_request(_ctx: CallContext, mut stream: ServerStream) -> Result<(), Status> {
    let mut received = Vec::new();
    while let Some(note) = stream.recv::<Note>().await? {
        received.push(note.message);
    }
    info!("Client streamed {} messages", received.len());
    Ok(())
}

async fn stream_duplex(_ctx: CallContext, mut stream: ServerStream) -> Result<(), Status> {
    while let Some(note) = stream.recv::<Note>().await? {
        stream.send(&note).await?;
    }
    Ok(())
}

fn note_schema(name: &str) -> MessageSchema {
    MessageSchema::new(name).field(FieldSchema::new("message", FieldKind::String))
}

fn example_service() -> ServiceDescriptor {
    ServiceDescriptor::new("example.Example")
        .method(
            MethodDescriptor::new("Unary", Verb::Get, "/unary/{id}", unary_fn(unary))
                .summary("Echo the path id and query message")
                .request(
                    MessageSchema::new("UnaryRequest")
                        .field(FieldSchema::new("id", FieldKind::String).in_path("id"))
                        .field(FieldSchema::new("message", FieldKind::String).in_query("message"))
                        .field(FieldSchema::new("extra", FieldKind::String).in_header("x-extra")),
                )
                .response(
                    MessageSchema::new("UnaryResponse")
                        .field(FieldSchema::new("message", FieldKind::String))
                        .field(FieldSchema::new("testHeader", FieldKind::Int64).in_header("x-test-header")),
                ),
        )
        .stream(
            StreamDescriptor::new("StreamResponse", "/stream/response", stream_fn(stream_response))
                .directions(false, true)
                .request(MessageSchema::new("Empty"))
                .response(note_schema("Note")),
        )
        .stream(
            StreamDescriptor::new("StreamRequest", "/stream/request", stream_fn(stream_request))
                .directions(true, false)
                .request(note_schema("Note"))
                .response(MessageSchema::new("Empty")),
        )
        .stream(
            StreamDescriptor::new("StreamDuplex", "/stream/duplex", stream_fn(stream_duplex))
                .request(note_schema("Note"))
                .response(note_schema("Note")),
        )
}

fn log_calls<'a>(ctx: CallContext, request: Value, info: &'a UnaryServerInfo, next: UnaryNext<'a>) -> futures::future::BoxFuture<'a, Result<Value, Status>> {
    let started = Instant::now();
    let method = info.full_method.clone();
    next.run(ctx, request)
        .map(move |result| {
            match &result {
                Ok(_) => info!("{} completed in {:?}", method, started.elapsed()),
                Err(status) => info!("{} failed in {:?}: {}", method, started.elapsed(), status),
            }
            result
        })
        .boxed()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if std::env::args().nth(1).as_deref() == Some("openapi") {
        let info = ApiInfo {
            title: "example.Example".to_string(),
            ..Default::default()
        };
        match openapi::document(&[example_service()], &info).map(|doc| serde_json::to_string_pretty(&doc).unwrap_or_default()) {
            Ok(doc) => println!("{}", doc),
            Err(e) => error!("Failed to build the API document: {}", e),
        }
        return;
    }

    info!("Starting Dotlanth transcoding gateway");
    let config = GatewayConfig::from_env();
    info!("Loaded configuration: bind_address={}", config.bind_address);

    let server = Server::new(config).with_unary_interceptor(unary_interceptor_fn(log_calls));
    if let Err(e) = server.register_service(example_service()) {
        error!("Failed to register example service: {}", e);
        return;
    }

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            shutdown.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("Gateway stopped: {}", e);
    }
}
