//! The transport: one dispatch thread, any number of listeners and dialed
//! connections, and the [`Peer`] handles that reach them.
//!
//! # Example
//!
//! ```no_run
//! use peerwire::router::{handler, HandlerError, Router};
//! use peerwire::Transport;
//!
//! # async fn run() -> peerwire::Result<()> {
//! let mut router = Router::new();
//! router.route("/echo", handler::body(|text: Option<String>| {
//!     Ok::<_, HandlerError>(text.unwrap_or_default())
//! }))?;
//!
//! let server = Transport::builder().router(router).start()?;
//! let listener = server.listen("127.0.0.1:0").await?;
//!
//! let client = Transport::builder().start()?;
//! let peer = client
//!     .connect(&listener.local_addr().to_string(), "Server")
//!     .await?;
//! let reply = peer.call::<_, String>("/echo", "hello").await?;
//! assert_eq!(reply.body.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod tcp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::ListenerId;
use crate::dispatcher::{Dispatcher, DispatcherParts, EventHook};
use crate::error::{PeerwireError, Result};
use crate::peer::{Peer, PeerEvent};
use crate::router::Router;
use crate::scheduler::{spawn_scheduler, SchedulerHandle};
use crate::services::ServiceResolver;
use crate::settings::{MemorySettings, SettingsStore};

/// Configures and starts a [`Transport`].
pub struct TransportBuilder {
    config: Config,
    router: Router,
    settings: Arc<dyn SettingsStore>,
    services: Option<Arc<dyn ServiceResolver>>,
    on_event: Option<EventHook>,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            router: Router::new(),
            settings: Arc::new(MemorySettings::new()),
            services: None,
            on_event: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Root router for inbound calls. Defaults to an empty router.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Where reconnection tokens are kept. Defaults to [`MemorySettings`].
    pub fn settings<S: SettingsStore>(mut self, settings: S) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Resolver opening one service scope per inbound request.
    pub fn services<R: ServiceResolver>(mut self, services: R) -> Self {
        self.services = Some(Arc::new(services));
        self
    }

    /// Hook receiving connect and disconnect events on the dispatch thread.
    pub fn on_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(PeerEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(hook));
        self
    }

    /// Spawn the dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns [`PeerwireError::NoRuntime`] outside a tokio runtime.
    pub fn start(self) -> Result<Transport> {
        let runtime = Handle::try_current().map_err(|_| PeerwireError::NoRuntime)?;
        let shutdown = CancellationToken::new();
        let config = Arc::new(self.config);

        let parts = DispatcherParts {
            config: config.clone(),
            router: Arc::new(self.router),
            settings: self.settings,
            services: self.services,
            on_event: self.on_event,
        };
        let handle = spawn_scheduler("peerwire-dispatch", runtime, shutdown.clone(), move |handle| {
            let dispatcher = Dispatcher::new(handle, parts);
            dispatcher.schedule_health_tick();
            dispatcher
        })?;
        tracing::debug!("Transport started");

        Ok(Transport {
            config,
            handle,
            shutdown,
            next_listener: AtomicU64::new(1),
        })
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running transport. Dropping it shuts it down.
pub struct Transport {
    config: Arc<Config>,
    handle: SchedulerHandle<Dispatcher>,
    shutdown: CancellationToken,
    next_listener: AtomicU64,
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accept connections on `addr`.
    ///
    /// Each accepted socket starts the listening side of the handshake.
    pub async fn listen(&self, addr: &str) -> Result<Listener> {
        if self.shutdown.is_cancelled() {
            return Err(PeerwireError::Shutdown);
        }
        let listener = tcp::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let stop = self.shutdown.child_token();

        self.handle.runtime().spawn(tcp::accept_loop(
            listener,
            id,
            self.handle.clone(),
            stop.clone(),
        ));
        tracing::info!("Listening on {}", local_addr);

        Ok(Listener {
            id,
            local_addr,
            stop,
            handle: self.handle.clone(),
        })
    }

    /// Dial `addr` and complete the handshake under `connection_identifier`.
    ///
    /// Dialing again with the same identifier returns the same logical peer
    /// and replaces its previous connection. The identity token received
    /// from the listener is saved in the settings store and presented on the
    /// next dial, so the listener recognizes us as the same client.
    ///
    /// # Errors
    ///
    /// - [`PeerwireError::UnknownHost`] if `addr` does not resolve.
    /// - [`PeerwireError::ConnectTimeout`] if TCP connect exceeds the
    ///   handshake timeout.
    /// - [`PeerwireError::HandshakeTimeout`] if the handshake does not finish
    ///   in time.
    /// - [`PeerwireError::Shutdown`] if the transport shuts down meanwhile.
    pub async fn connect(&self, addr: &str, connection_identifier: &str) -> Result<Peer> {
        let attempt = async {
            let stream = tcp::dial(addr, self.config.handshake_timeout).await?;
            let (tx, rx) = oneshot::channel();
            let identifier = connection_identifier.to_string();
            self.handle
                .post(move |dispatcher| dispatcher.on_dialed(identifier, stream, tx));
            rx.await.map_err(|_| PeerwireError::Shutdown)?
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(PeerwireError::Shutdown),
            result = attempt => result,
        }
    }

    /// Close every connection, resolve pending calls with `Timeout` and stop
    /// the dispatch thread. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Shutting down transport");
        self.shutdown.cancel();
        self.handle.post(|dispatcher| dispatcher.shutdown());
        self.handle.stop();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A bound TCP listener.
///
/// Accepting continues until [`close`](Self::close) or transport shutdown;
/// dropping the value does not stop it.
pub struct Listener {
    id: ListenerId,
    local_addr: SocketAddr,
    stop: CancellationToken,
    handle: SchedulerHandle<Dispatcher>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Every logical client identified through this listener, oldest first,
    /// whether or not it is currently connected.
    pub async fn clients(&self) -> Vec<Peer> {
        let id = self.id;
        let (tx, rx) = oneshot::channel();
        self.handle.post(move |dispatcher| {
            let _ = tx.send(dispatcher.listener_clients(id));
        });
        rx.await.unwrap_or_default()
    }

    /// Stop accepting. Existing connections stay open.
    pub fn close(&self) {
        self.stop.cancel();
    }
}
