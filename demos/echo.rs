//! Echo - a listener and a dialer in one process.
//!
//! This example demonstrates:
//! - Registering typed routes with the `handler::json` adapter
//! - Listening and connecting under a connection identifier
//! - Calling in both directions over the same connection
//!
//! # Running
//!
//! ```text
//! RUST_LOG=peerwire=debug cargo run --example echo
//! ```

use peerwire::router::{handler, HandlerError, Reply, Request, Response, Router};
use peerwire::{PeerEvent, Transport};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo route.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo route.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
    client_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut routes = Router::new();
    routes.route(
        "/echo",
        handler::json(|request: &Request, input: Option<EchoInput>| {
            let input = input.ok_or_else(|| HandlerError::msg("missing input"))?;
            Ok(Reply::ok(EchoOutput {
                echo: input.message,
                client_id: request.caller().client_id(),
            }))
        }),
    )?;

    let server = Transport::builder()
        .router(routes)
        .on_event(|event| match event {
            PeerEvent::Connected(info) => println!("client {} connected", info.client_id()),
            PeerEvent::Disconnected(info) => println!("client {} left", info.client_id()),
        })
        .start()?;
    let listener = server.listen("127.0.0.1:0").await?;
    println!("listening on {}", listener.local_addr());

    // The dialer answers calls too
    let mut client_routes = Router::new();
    client_routes.route("/ping", |_: &Request| Ok(Response::json(&"pong")))?;
    let client = Transport::builder().router(client_routes).start()?;

    let server_peer = client
        .connect(&listener.local_addr().to_string(), "EchoServer")
        .await?;

    let input = EchoInput {
        message: "hello".to_string(),
    };
    let reply: Reply<EchoOutput> = server_peer.call("/echo", &input).await?;
    println!("{} -> {:?}", reply.status, reply.body);

    for client_peer in listener.clients().await {
        let pong: Reply<String> = client_peer.call("/ping", &()).await?;
        println!("client {} says {:?}", client_peer.info().client_id(), pong.body);
    }

    client.shutdown();
    server.shutdown();
    Ok(())
}
