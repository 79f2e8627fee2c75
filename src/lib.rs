//! # peerwire
//!
//! Bidirectional request/response messaging between processes over TCP.
//!
//! Either end of a connection can call the other. Inbound calls are routed
//! by path through a tree of routers with middleware and typed exception
//! handlers; outbound calls resolve exactly once with a response, a
//! `Timeout` or `NotReachable`.
//!
//! ## Architecture
//!
//! - **Wire**: length-prefixed frames carrying tagged packets; headers and
//!   bodies are JSON text.
//! - **Dispatch thread**: one dedicated thread owns all connection, peer,
//!   health and pending-call state. Socket I/O runs on tokio tasks that
//!   post to it.
//! - **Identity**: a handshake binds each connection to a logical peer that
//!   survives reconnects.
//!
//! ## Example
//!
//! ```no_run
//! use peerwire::router::{handler, HandlerError, Router};
//! use peerwire::Transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.route("/math/double", handler::body(|n: Option<i64>| {
//!         Ok::<_, HandlerError>(n.unwrap_or(0) * 2)
//!     }))?;
//!
//!     let server = Transport::builder().router(router).start()?;
//!     let listener = server.listen("127.0.0.1:7400").await?;
//!
//!     let client = Transport::builder().start()?;
//!     let peer = client.connect(&listener.local_addr().to_string(), "Server").await?;
//!     let reply = peer.call::<_, i64>("/math/double", &21).await?;
//!     assert_eq!(reply.body, Some(42));
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod peer;
pub mod protocol;
pub mod router;
pub mod scheduler;
pub mod services;
pub mod settings;
pub mod transport;

mod connection;
mod dispatcher;
mod handshake;
mod methods;
mod writer;

pub use config::{Config, HealthConfig};
pub use connection::ConnectionState;
pub use error::{PeerwireError, Result};
pub use handshake::{generate_token, TOKEN_LENGTH};
pub use health::HealthStatus;
pub use peer::{OwnerId, Peer, PeerEvent, PeerInfo, PeerRole};
pub use scheduler::{Execution, Task, TaskQueue};
pub use transport::{Listener, Transport, TransportBuilder};
