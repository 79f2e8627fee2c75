//! State owned by the dispatch thread.
//!
//! Every packet, timer and API call touching connections, logical peers,
//! pending calls or health records ends up as a job on the dispatch thread,
//! which owns a single [`Dispatcher`]. Nothing here is locked.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::codec::{JsonCodec, NULL_PAYLOAD};
use crate::config::Config;
use crate::connection::{
    ConnectWaiter, Connection, ConnectionId, ConnectionState, ListenerId, Side,
};
use crate::handshake::ClientDirectory;
use crate::health::{HealthAction, HealthMonitor, HealthStatus};
use crate::methods::{Completion, MethodTable, PendingRequest, ResponseCallback};
use crate::peer::{OwnerId, OwnerShared, Peer, PeerEvent, PeerInfo};
use crate::protocol::Packet;
use crate::router::{Headers, Request, Response, RoutePath, Router, Status};
use crate::scheduler::{Execution, SchedulerHandle, Task, TimerHandle};
use crate::services::ServiceResolver;
use crate::settings::{token_key, SettingsStore};

/// Hook receiving peer lifecycle events on the dispatch thread.
pub(crate) type EventHook = Arc<dyn Fn(PeerEvent) + Send + Sync + 'static>;

/// Everything the dispatcher needs besides its scheduler handle.
pub(crate) struct DispatcherParts {
    pub(crate) config: Arc<Config>,
    pub(crate) router: Arc<Router>,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) services: Option<Arc<dyn ServiceResolver>>,
    pub(crate) on_event: Option<EventHook>,
}

struct OwnerEntry {
    info: PeerInfo,
    shared: Arc<OwnerShared>,
    connection: Option<ConnectionId>,
    withhold_health_replies: bool,
}

impl OwnerEntry {
    fn new(info: PeerInfo) -> Self {
        Self {
            info,
            shared: Arc::new(OwnerShared::default()),
            connection: None,
            withhold_health_replies: false,
        }
    }
}

pub(crate) struct Dispatcher {
    handle: SchedulerHandle<Dispatcher>,
    config: Arc<Config>,
    router: Arc<Router>,
    settings: Arc<dyn SettingsStore>,
    services: Option<Arc<dyn ServiceResolver>>,
    on_event: Option<EventHook>,

    connections: HashMap<ConnectionId, Connection>,
    owners: HashMap<OwnerId, OwnerEntry>,
    /// Owner used for each connection identifier we dial.
    dialers: HashMap<String, OwnerId>,
    directories: HashMap<ListenerId, ClientDirectory>,
    health: HealthMonitor,
    methods: MethodTable,

    next_connection: u64,
    next_owner: u64,
    next_client_id: u32,
}

impl Dispatcher {
    pub(crate) fn new(handle: SchedulerHandle<Dispatcher>, parts: DispatcherParts) -> Self {
        Self {
            handle,
            config: parts.config,
            router: parts.router,
            settings: parts.settings,
            services: parts.services,
            on_event: parts.on_event,
            connections: HashMap::new(),
            owners: HashMap::new(),
            dialers: HashMap::new(),
            directories: HashMap::new(),
            health: HealthMonitor::new(),
            methods: MethodTable::new(),
            next_connection: 1,
            next_owner: 1,
            next_client_id: 1,
        }
    }

    // ---- connection setup ----

    pub(crate) fn on_accepted(&mut self, listener: ListenerId, stream: TcpStream) {
        let id = self.allocate_connection();
        let side = Side::Accepted { listener };
        let mut connection = match Connection::spawn(
            &self.handle,
            id,
            stream,
            side,
            self.config.max_payload_size,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("Failed to set up accepted connection: {}", e);
                return;
            }
        };
        tracing::info!("{} accepted from {}", id, connection.remote);

        connection.handshake_timer = Some(self.arm_handshake_timer(id));
        if let Err(e) = connection.send(&Packet::BeginHandshake) {
            tracing::warn!("{}: could not begin handshake: {}", id, e);
        }
        self.health.register(id);
        self.connections.insert(id, connection);
    }

    pub(crate) fn on_dialed(&mut self, identifier: String, stream: TcpStream, waiter: ConnectWaiter) {
        let owner = match self.dialers.get(&identifier) {
            Some(owner) => *owner,
            None => {
                let owner = self.allocate_owner();
                self.dialers.insert(identifier.clone(), owner);
                owner
            }
        };

        let id = self.allocate_connection();
        let side = Side::Dialed {
            identifier,
            owner,
            waiter: None,
        };
        let mut connection = match Connection::spawn(
            &self.handle,
            id,
            stream,
            side,
            self.config.max_payload_size,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                let _ = waiter.send(Err(e));
                return;
            }
        };
        tracing::info!("{} connected to {}", id, connection.remote);

        if let Side::Dialed { waiter: slot, .. } = &mut connection.side {
            *slot = Some(waiter);
        }
        connection.handshake_timer = Some(self.arm_handshake_timer(id));
        self.health.register(id);
        self.connections.insert(id, connection);
    }

    fn arm_handshake_timer(&self, id: ConnectionId) -> TimerHandle {
        self.handle
            .post_after(self.config.handshake_timeout, move |dispatcher| {
                dispatcher.on_handshake_timeout(id)
            })
    }

    fn on_handshake_timeout(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        if connection.is_identified() {
            return;
        }
        tracing::error!(
            "{}: handshake with {} timed out after {:?}",
            id,
            connection.remote,
            self.config.handshake_timeout
        );
        connection.handshake_timer = None;
        if let Some(waiter) = connection.take_waiter() {
            let _ = waiter.send(Err(crate::error::PeerwireError::HandshakeTimeout));
        }
        self.close_connection(id, "handshake timed out");
    }

    // ---- inbound packets ----

    pub(crate) fn on_frame(&mut self, id: ConnectionId, payload: Bytes) {
        let Some(connection) = self.connections.get_mut(&id) else {
            tracing::trace!("{}: frame after close dropped", id);
            return;
        };
        connection.last_packet_received = Instant::now();

        let packet = match Packet::decode(&payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("{}: dropping packet: {}", id, e);
                return;
            }
        };
        tracing::debug!("{} -> {:?}", id, packet.kind());

        match packet {
            Packet::BeginHandshake => self.on_begin_handshake(id),
            Packet::IdToken { token } => self.on_id_token(id, token),
            Packet::ClientIdentified { client_id, token } => {
                self.on_client_identified(id, client_id, token)
            }
            Packet::Method {
                seq,
                path,
                headers,
                body,
            } => self.on_method(id, seq, path, headers, body),
            Packet::MethodResponse {
                seq,
                status,
                headers,
                body,
            } => self.on_method_response(id, seq, status, headers, body),
            Packet::HealthCheck => self.on_health_check(id),
            Packet::HealthCheckResponse => self.health.on_response(id),
        }
    }

    fn on_begin_handshake(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        let identifier = match (&connection.side, connection.state) {
            (Side::Dialed { identifier, .. }, ConnectionState::Connecting) => identifier.clone(),
            _ => {
                tracing::warn!("{}: unexpected BeginHandshake dropped", id);
                return;
            }
        };

        let token = self.settings.get(&token_key(&identifier)).unwrap_or_default();
        connection.state = ConnectionState::AwaitingHandshake;
        if let Err(e) = connection.send(&Packet::IdToken { token }) {
            tracing::warn!("{}: could not send identity token: {}", id, e);
        }
    }

    fn on_id_token(&mut self, id: ConnectionId, token: String) {
        let Some(connection) = self.connections.get(&id) else {
            return;
        };
        let listener = match (&connection.side, connection.state) {
            (Side::Accepted { listener }, ConnectionState::AwaitingHandshake) => *listener,
            _ => {
                tracing::warn!("{}: unexpected IdToken dropped", id);
                return;
            }
        };

        let owners = &self.owners;
        let next_client_id = &mut self.next_client_id;
        let next_owner = &mut self.next_owner;
        let directory = self.directories.entry(listener).or_default();
        let (record, created) = directory.identify(
            &token,
            |owner| owners.get(&owner).map_or(false, |o| o.connection.is_some()),
            || {
                let client_id = *next_client_id;
                *next_client_id = next_client_id.wrapping_add(1);
                let owner = OwnerId::new(*next_owner);
                *next_owner += 1;
                (client_id, owner)
            },
        );
        if created {
            self.owners.insert(
                record.owner,
                OwnerEntry::new(PeerInfo::client(record.owner, record.client_id)),
            );
        }

        if let Some(connection) = self.connections.get(&id) {
            let reply = Packet::ClientIdentified {
                client_id: record.client_id,
                token: record.token.clone(),
            };
            if let Err(e) = connection.send(&reply) {
                tracing::warn!("{}: could not confirm identity: {}", id, e);
            }
        }
        self.bind(record.owner, id);
        tracing::info!(
            "{} identified as client {}{}",
            id,
            record.client_id,
            if created { " (new)" } else { "" }
        );
        self.emit_connected(record.owner);
    }

    fn on_client_identified(&mut self, id: ConnectionId, client_id: u32, token: String) {
        let Some(connection) = self.connections.get(&id) else {
            return;
        };
        let (identifier, owner) = match (&connection.side, connection.state) {
            (
                Side::Dialed {
                    identifier, owner, ..
                },
                ConnectionState::AwaitingHandshake,
            ) => (identifier.clone(), *owner),
            _ => {
                tracing::warn!("{}: unexpected ClientIdentified dropped", id);
                return;
            }
        };

        self.settings.set(&token_key(&identifier), &token);
        let info = PeerInfo::server(owner, identifier.clone(), client_id);
        match self.owners.get_mut(&owner) {
            Some(entry) => entry.info = info,
            None => {
                self.owners.insert(owner, OwnerEntry::new(info));
            }
        }
        self.bind(owner, id);
        tracing::info!("{} identified by {} as client {}", id, identifier, client_id);

        let peer = self.peer(owner);
        if let (Some(peer), Some(waiter)) = (
            peer,
            self.connections.get_mut(&id).and_then(Connection::take_waiter),
        ) {
            let _ = waiter.send(Ok(peer));
        }
        self.emit_connected(owner);
    }

    fn on_health_check(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get(&id) else {
            return;
        };
        let withhold = connection
            .owner
            .and_then(|owner| self.owners.get(&owner))
            .map_or(false, |entry| entry.withhold_health_replies);
        if withhold {
            tracing::debug!("{}: withholding health check reply", id);
            return;
        }
        if let Err(e) = connection.send(&Packet::HealthCheckResponse) {
            tracing::warn!("{}: could not answer health check: {}", id, e);
        }
    }

    // ---- binding and closing ----

    /// Bind `owner` to connection `id`, closing the owner's previous
    /// connection.
    fn bind(&mut self, owner: OwnerId, id: ConnectionId) {
        let previous = self.owners.get(&owner).and_then(|entry| entry.connection);
        if let Some(previous) = previous.filter(|previous| *previous != id) {
            self.close_connection(previous, "peer bound to a newer connection");
        }

        if let Some(connection) = self.connections.get_mut(&id) {
            connection.owner = Some(owner);
            connection.state = ConnectionState::Identified;
            connection.cancel_handshake_timer();
        }
        if let Some(entry) = self.owners.get_mut(&owner) {
            entry.connection = Some(id);
            entry.shared.set_connected(true);
        }
    }

    /// Close connection `id`. Safe to call repeatedly.
    pub(crate) fn close_connection(&mut self, id: ConnectionId, reason: &str) {
        let Some(mut connection) = self.connections.remove(&id) else {
            return;
        };
        connection.close();
        self.health.unregister(id);
        tracing::info!(
            "{} to {} closed: {} ({} frames still queued)",
            id,
            connection.remote,
            reason,
            connection.pending_writes()
        );

        let Some(owner) = connection.owner else {
            return;
        };
        let info = match self.owners.get_mut(&owner) {
            Some(entry) if entry.connection == Some(id) => {
                entry.connection = None;
                entry.shared.set_connected(false);
                entry.info.clone()
            }
            _ => return,
        };
        self.emit(PeerEvent::Disconnected(info));
    }

    pub(crate) fn disconnect_owner(&mut self, owner: OwnerId, reason: &str) {
        if let Some(id) = self.connection_of(owner) {
            self.close_connection(id, reason);
        }
    }

    // ---- inbound calls ----

    fn on_method(
        &mut self,
        id: ConnectionId,
        seq: u32,
        path: String,
        headers: String,
        body: String,
    ) {
        let Some(connection) = self.connections.get(&id) else {
            return;
        };
        let Some(owner) = connection.owner.filter(|_| connection.is_identified()) else {
            tracing::warn!("{}: method {} before identification", id, path);
            let packet = response_packet(seq, Response::new(Status::BadRequest));
            if let Err(e) = connection.send(&packet) {
                tracing::warn!("{}: could not reject method: {}", id, e);
            }
            return;
        };

        let headers = JsonCodec::decode_lenient::<Headers>(&headers, "headers").unwrap_or_default();
        let path = RoutePath::parse(&path);
        let Some(execution) = self
            .router
            .resolve_execution(&path, &self.config.route_execution)
        else {
            tracing::debug!("{}: no route for {}", id, path);
            self.respond(owner, seq, Response::new(Status::NotFound));
            return;
        };
        let Some(peer) = self.peer(owner) else {
            return;
        };

        let mut request = Request::new(peer.info().clone(), path)
            .with_sequence(seq)
            .with_headers(headers)
            .with_raw_body(body)
            .with_peer(peer);
        if let Some(services) = &self.services {
            request = request.with_services(services.begin_scope());
        }
        let include_stack_trace = self.config.respond_with_stack_trace;

        match execution {
            Execution::Dispatcher => {
                let response = self.router.dispatch(&mut request, include_stack_trace);
                self.respond(owner, seq, response);
            }
            other => {
                let router = self.router.clone();
                let handle = self.handle.clone();
                let task: Task = Box::new(move || {
                    let response = router.dispatch(&mut request, include_stack_trace);
                    // Ends the service scope before the reply goes out
                    drop(request);
                    handle.post(move |dispatcher| dispatcher.respond(owner, seq, response));
                });
                self.handle.execute(&other, task);
            }
        }
    }

    /// Send `response` for call `seq` to the owner's current connection.
    pub(crate) fn respond(&mut self, owner: OwnerId, seq: u32, response: Response) {
        let Some(connection) = self
            .connection_of(owner)
            .and_then(|id| self.connections.get(&id))
        else {
            tracing::warn!("Dropping response {} for disconnected peer {}", seq, owner);
            return;
        };
        if let Err(e) = connection.send(&response_packet(seq, response)) {
            tracing::warn!("{}: could not send response {}: {}", connection.id, seq, e);
        }
    }

    // ---- outbound calls ----

    pub(crate) fn send_method(
        &mut self,
        owner: OwnerId,
        path: String,
        headers: Headers,
        body: Option<String>,
        execution: Execution,
        callback: ResponseCallback,
    ) {
        let Some(id) = self.connection_of(owner) else {
            tracing::debug!("Call to {} on disconnected peer {}", path, owner);
            self.run_callback(&execution, callback, Response::new(Status::NotReachable));
            return;
        };

        let seq = self.methods.next_sequence();
        let packet = Packet::Method {
            seq,
            path: path.clone(),
            headers: JsonCodec::encode_lenient(Some(&headers), "headers"),
            body: body.unwrap_or_else(|| NULL_PAYLOAD.to_string()),
        };

        let mut pending = PendingRequest::new(seq, owner, path, execution, callback);
        pending.timer = Some(
            self.handle
                .post_after(self.config.method_timeout, move |dispatcher| {
                    dispatcher.on_method_timeout(seq)
                }),
        );
        if let Some(replaced) = self.methods.insert(pending) {
            self.run_callback(&replaced.execution, replaced.callback, Response::new(Status::Timeout));
        }

        if let Some(connection) = self.connections.get(&id) {
            if let Err(e) = connection.send(&packet) {
                tracing::warn!("{}: could not send call {}: {}", id, seq, e);
            }
        }
    }

    fn on_method_response(
        &mut self,
        id: ConnectionId,
        seq: u32,
        status: i32,
        headers: String,
        body: String,
    ) {
        let from = self.connections.get(&id).and_then(|c| c.owner);
        match self.methods.complete(seq, from) {
            Completion::Unknown => {
                tracing::warn!("{}: response for unknown or completed call {}", id, seq);
            }
            Completion::OwnerMismatch { expected } => {
                tracing::warn!(
                    "{}: response {} from {:?}, call was sent to {}",
                    id,
                    seq,
                    from,
                    expected
                );
            }
            Completion::Done(mut pending) => {
                pending.cancel_timer();
                tracing::trace!(
                    "Call {} to {} answered in {:?}",
                    seq,
                    pending.path,
                    pending.created.elapsed()
                );
                let response = Response {
                    status: Status::from_code(status),
                    headers: JsonCodec::decode_lenient::<Headers>(&headers, "headers")
                        .unwrap_or_default(),
                    body: non_null(body),
                };
                self.run_callback(&pending.execution, pending.callback, response);
            }
        }
    }

    fn on_method_timeout(&mut self, seq: u32) {
        let Some(pending) = self.methods.expire(seq) else {
            return;
        };
        tracing::warn!(
            "Call {} to {} on {} timed out after {:?}",
            seq,
            pending.path,
            pending.owner,
            pending.created.elapsed()
        );
        self.run_callback(&pending.execution, pending.callback, Response::new(Status::Timeout));
    }

    fn run_callback(&self, execution: &Execution, callback: ResponseCallback, response: Response) {
        let task: Task = Box::new(move || {
            if catch_unwind(AssertUnwindSafe(move || callback(response))).is_err() {
                tracing::error!("Response callback panicked");
            }
        });
        self.handle.execute(execution, task);
    }

    // ---- health ----

    pub(crate) fn schedule_health_tick(&self) {
        self.handle
            .post_after(self.config.health.tick_interval, |dispatcher| {
                dispatcher.health_tick();
                dispatcher.schedule_health_tick();
            });
    }

    fn health_tick(&mut self) {
        let now = Instant::now();
        let connections = &self.connections;
        let actions = self.health.tick(now, &self.config.health, |id| {
            connections
                .get(&id)
                .filter(|c| c.is_identified())
                .map(|c| c.last_packet_received)
        });

        for action in actions {
            match action {
                HealthAction::SendCheck(id) => {
                    if let Some(connection) = self.connections.get(&id) {
                        tracing::debug!("{}: quiet, sending health check", id);
                        if let Err(e) = connection.send(&Packet::HealthCheck) {
                            tracing::warn!("{}: could not send health check: {}", id, e);
                        }
                    }
                }
                HealthAction::Close(id) => {
                    tracing::error!(
                        "{}: no health check reply within {:?}",
                        id,
                        self.config.health.health_check_timeout
                    );
                    self.close_connection(id, "health check timed out");
                }
            }
        }
    }

    pub(crate) fn check_owner_health(&mut self, owner: OwnerId) {
        let Some(id) = self.connection_of(owner) else {
            return;
        };
        if self.health.force_check(id, Instant::now()) {
            if let Some(connection) = self.connections.get(&id) {
                if let Err(e) = connection.send(&Packet::HealthCheck) {
                    tracing::warn!("{}: could not send health check: {}", id, e);
                }
            }
        }
    }

    pub(crate) fn owner_health(&self, owner: OwnerId) -> Option<HealthStatus> {
        self.connection_of(owner)
            .and_then(|id| self.health.status(id))
    }

    pub(crate) fn set_withhold_health_replies(&mut self, owner: OwnerId, withhold: bool) {
        if let Some(entry) = self.owners.get_mut(&owner) {
            entry.withhold_health_replies = withhold;
        }
    }

    // ---- queries and lifecycle ----

    pub(crate) fn peer(&self, owner: OwnerId) -> Option<Peer> {
        self.owners.get(&owner).map(|entry| {
            Peer::new(entry.info.clone(), entry.shared.clone(), self.handle.clone())
        })
    }

    /// Logical clients of `listener`, oldest first.
    pub(crate) fn listener_clients(&self, listener: ListenerId) -> Vec<Peer> {
        self.directories
            .get(&listener)
            .map(|directory| {
                directory
                    .records()
                    .filter_map(|record| self.peer(record.owner))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Close every connection and resolve every pending call.
    pub(crate) fn shutdown(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.close_connection(id, "transport shut down");
        }
        for mut pending in self.methods.drain() {
            pending.cancel_timer();
            self.run_callback(&pending.execution, pending.callback, Response::new(Status::Timeout));
        }
        tracing::debug!("Dispatcher shut down");
    }

    pub(crate) fn response_execution(&self) -> Execution {
        self.config.response_execution.clone()
    }

    fn connection_of(&self, owner: OwnerId) -> Option<ConnectionId> {
        self.owners.get(&owner).and_then(|entry| entry.connection)
    }

    fn emit_connected(&self, owner: OwnerId) {
        if let Some(entry) = self.owners.get(&owner) {
            self.emit(PeerEvent::Connected(entry.info.clone()));
        }
    }

    fn emit(&self, event: PeerEvent) {
        let Some(hook) = &self.on_event else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
            tracing::error!("Peer event hook panicked");
        }
    }

    fn allocate_connection(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        id
    }

    fn allocate_owner(&mut self) -> OwnerId {
        let owner = OwnerId::new(self.next_owner);
        self.next_owner += 1;
        owner
    }
}

fn response_packet(seq: u32, response: Response) -> Packet {
    Packet::MethodResponse {
        seq,
        status: response.status.code(),
        headers: JsonCodec::encode_lenient(Some(&response.headers), "headers"),
        body: response.body.unwrap_or_else(|| NULL_PAYLOAD.to_string()),
    }
}

fn non_null(body: String) -> Option<String> {
    if body.is_empty() || body == NULL_PAYLOAD {
        None
    } else {
        Some(body)
    }
}
