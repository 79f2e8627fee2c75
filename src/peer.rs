//! Logical peers: identities that survive reconnects, and the handle used
//! to talk to them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::codec::JsonCodec;
use crate::dispatcher::Dispatcher;
use crate::error::{PeerwireError, Result};
use crate::health::HealthStatus;
use crate::router::{Headers, Reply, Response};
use crate::scheduler::{Execution, SchedulerHandle};

/// Transport-local identifier of a logical peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the remote side relates to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRole {
    /// The remote dialed one of our listeners.
    Client { client_id: u32 },
    /// We dialed the remote under `connection_identifier` and it assigned
    /// us `client_id`.
    Server {
        connection_identifier: String,
        client_id: u32,
    },
}

/// Identity of a logical peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    id: OwnerId,
    role: PeerRole,
}

impl PeerInfo {
    pub fn client(id: OwnerId, client_id: u32) -> Self {
        Self {
            id,
            role: PeerRole::Client { client_id },
        }
    }

    pub fn server(id: OwnerId, connection_identifier: impl Into<String>, client_id: u32) -> Self {
        Self {
            id,
            role: PeerRole::Server {
                connection_identifier: connection_identifier.into(),
                client_id,
            },
        }
    }

    #[inline]
    pub fn id(&self) -> OwnerId {
        self.id
    }

    #[inline]
    pub fn role(&self) -> &PeerRole {
        &self.role
    }

    pub fn is_client(&self) -> bool {
        matches!(self.role, PeerRole::Client { .. })
    }

    pub fn is_server(&self) -> bool {
        matches!(self.role, PeerRole::Server { .. })
    }

    /// Numeric id assigned by the listening side of the handshake.
    pub fn client_id(&self) -> u32 {
        match self.role {
            PeerRole::Client { client_id } | PeerRole::Server { client_id, .. } => client_id,
        }
    }
}

/// Connection lifecycle of a logical peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A connection completed the handshake and was bound to the peer.
    Connected(PeerInfo),
    /// The peer's current connection closed.
    Disconnected(PeerInfo),
}

/// State shared between the dispatch thread and every [`Peer`] handle.
#[derive(Debug, Default)]
pub(crate) struct OwnerShared {
    connected: AtomicBool,
}

impl OwnerShared {
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Handle to a logical peer.
///
/// Cheaply cloneable. Calls made through a handle go to whichever
/// connection the peer is bound to at the time.
#[derive(Clone)]
pub struct Peer {
    info: PeerInfo,
    shared: Arc<OwnerShared>,
    handle: SchedulerHandle<Dispatcher>,
}

impl Peer {
    pub(crate) fn new(
        info: PeerInfo,
        shared: Arc<OwnerShared>,
        handle: SchedulerHandle<Dispatcher>,
    ) -> Self {
        Self {
            info,
            shared,
            handle,
        }
    }

    #[inline]
    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    #[inline]
    pub fn id(&self) -> OwnerId {
        self.info.id
    }

    /// Check if the peer currently has a live, identified connection.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Send a method call and deliver its single outcome to `callback`.
    ///
    /// `callback` runs on `execution` and receives the peer's response, a
    /// `NotReachable` response if the peer is not connected, or a `Timeout`
    /// response if no answer arrives in time.
    pub fn send_method<F>(
        &self,
        path: &str,
        headers: Headers,
        body: Option<String>,
        execution: Execution,
        callback: F,
    ) where
        F: FnOnce(Response) + Send + 'static,
    {
        let owner = self.info.id;
        let path = path.to_string();
        self.handle.post(move |dispatcher| {
            dispatcher.send_method(owner, path, headers, body, execution, Box::new(callback))
        });
    }

    /// Call `path` with `body` and wait for the typed reply.
    ///
    /// The completion runs on the transport's `response_execution`.
    ///
    /// # Errors
    ///
    /// Fails if `body` cannot be encoded or the transport shuts down before
    /// the call resolves. Remote failures, timeouts and unreachable peers
    /// are reported through the reply status.
    pub async fn call<B, R>(&self, path: &str, body: &B) -> Result<Reply<R>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with_headers(path, Headers::new(), body).await
    }

    /// [`call`](Self::call) with request headers.
    pub async fn call_with_headers<B, R>(
        &self,
        path: &str,
        headers: Headers,
        body: &B,
    ) -> Result<Reply<R>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = JsonCodec::encode(body)?;
        let (tx, rx) = oneshot::channel();
        let owner = self.info.id;
        let path = path.to_string();
        self.handle.post(move |dispatcher| {
            let execution = dispatcher.response_execution();
            let callback = Box::new(move |response: Response| {
                let _ = tx.send(response);
            });
            dispatcher.send_method(owner, path, headers, Some(body), execution, callback)
        });
        let response = rx.await.map_err(|_| PeerwireError::Shutdown)?;
        Ok(Reply {
            status: response.status,
            body: response
                .body
                .as_deref()
                .and_then(|text| JsonCodec::decode_lenient(text, "response body")),
            headers: response.headers,
        })
    }

    /// Close the peer's current connection, if any.
    pub fn disconnect(&self) {
        let owner = self.info.id;
        self.handle
            .post(move |dispatcher| dispatcher.disconnect_owner(owner, "disconnect requested"));
    }

    /// Send a health check now unless one is already outstanding.
    pub fn check_health(&self) {
        let owner = self.info.id;
        self.handle
            .post(move |dispatcher| dispatcher.check_owner_health(owner));
    }

    /// Health bookkeeping of the current connection, if connected.
    pub async fn health(&self) -> Option<HealthStatus> {
        let owner = self.info.id;
        let (tx, rx) = oneshot::channel();
        self.handle.post(move |dispatcher| {
            let _ = tx.send(dispatcher.owner_health(owner));
        });
        rx.await.ok().flatten()
    }

    /// Stop answering the peer's health checks. Meant for tests.
    pub fn withhold_health_replies(&self, withhold: bool) {
        let owner = self.info.id;
        self.handle.post(move |dispatcher| {
            dispatcher.set_withhold_health_replies(owner, withhold)
        });
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("info", &self.info)
            .field("connected", &self.is_connected())
            .finish()
    }
}
