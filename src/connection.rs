//! One physical connection.
//!
//! Each TCP stream gets a reader task and a writer task on the runtime. The
//! reader reassembles frames and posts every payload to the dispatch thread;
//! the [`Connection`] record itself lives on that thread.
//!
//! ```text
//! socket ─► read_loop ─► FrameBuffer ─► post(on_frame) ─► dispatch thread
//! dispatch thread ─► WriterHandle ─► writer task ─► socket
//! ```
//!
//! A read error, a zero-length read, a framing error or a failed write all
//! post a close for the connection. Closing is idempotent.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::error::{PeerwireError, Result};
use crate::peer::{OwnerId, Peer};
use crate::protocol::{FrameBuffer, Packet};
use crate::scheduler::{SchedulerHandle, TimerHandle};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies a listener within one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(pub(crate) u64);

/// Handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialed; waiting for the listener to begin the handshake.
    Connecting,
    /// Handshake messages are being exchanged.
    AwaitingHandshake,
    /// Bound to a logical peer.
    Identified,
    Closed,
}

/// Completes a pending `connect` call.
pub(crate) type ConnectWaiter = oneshot::Sender<Result<Peer>>;

/// Which end of the handshake this connection plays.
pub(crate) enum Side {
    /// Accepted by one of our listeners.
    Accepted { listener: ListenerId },
    /// Dialed by us under `identifier`.
    Dialed {
        identifier: String,
        owner: OwnerId,
        waiter: Option<ConnectWaiter>,
    },
}

pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) remote: SocketAddr,
    pub(crate) state: ConnectionState,
    pub(crate) side: Side,
    pub(crate) owner: Option<OwnerId>,
    pub(crate) last_packet_received: Instant,
    pub(crate) handshake_timer: Option<TimerHandle>,
    writer: WriterHandle,
    reader: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl Connection {
    /// Start I/O tasks for `stream` and build its record.
    ///
    /// Must be called on the dispatch thread; the tasks post back to it.
    pub(crate) fn spawn(
        handle: &SchedulerHandle<Dispatcher>,
        id: ConnectionId,
        stream: TcpStream,
        side: Side,
        max_payload_size: usize,
    ) -> Result<Self> {
        let remote = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("{}: could not set TCP_NODELAY: {}", id, e);
        }
        let (read_half, write_half) = stream.into_split();
        let runtime = handle.runtime();

        let (writer, writer_task) = spawn_writer_task(runtime, write_half);

        let watch_handle = handle.clone();
        let watcher = runtime.spawn(async move {
            let outcome = match writer_task.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("write failed: {}", e),
                Err(e) if e.is_cancelled() => return,
                Err(e) => format!("writer task failed: {}", e),
            };
            watch_handle.post(move |dispatcher| dispatcher.close_connection(id, &outcome));
        });

        let read_handle = handle.clone();
        let reader = runtime.spawn(async move {
            let reason = match read_loop(&read_handle, id, read_half, max_payload_size).await {
                Ok(()) => "peer closed the connection".to_string(),
                Err(e) => e.to_string(),
            };
            if !read_handle.shutdown_token().is_cancelled() {
                read_handle.post(move |dispatcher| dispatcher.close_connection(id, &reason));
            }
        });

        let state = match side {
            Side::Accepted { .. } => ConnectionState::AwaitingHandshake,
            Side::Dialed { .. } => ConnectionState::Connecting,
        };

        Ok(Self {
            id,
            remote,
            state,
            side,
            owner: None,
            last_packet_received: Instant::now(),
            handshake_timer: None,
            writer,
            reader,
            watcher,
        })
    }

    /// Queue `packet` on the writer.
    pub(crate) fn send(&self, packet: &Packet) -> Result<()> {
        tracing::debug!("{} <- {:?}", self.id, packet.kind());
        self.writer.send(packet.to_frame())
    }

    /// Frames queued but not yet written.
    pub(crate) fn pending_writes(&self) -> usize {
        self.writer.pending_count()
    }

    pub(crate) fn is_identified(&self) -> bool {
        self.state == ConnectionState::Identified
    }

    pub(crate) fn cancel_handshake_timer(&mut self) {
        if let Some(timer) = self.handshake_timer.take() {
            timer.cancel();
        }
    }

    /// Take the waiter of a dialed connection, if still pending.
    pub(crate) fn take_waiter(&mut self) -> Option<ConnectWaiter> {
        match &mut self.side {
            Side::Dialed { waiter, .. } => waiter.take(),
            Side::Accepted { .. } => None,
        }
    }

    /// Stop reading and cancel timers.
    ///
    /// The writer drains already queued frames and then shuts the socket
    /// down once the record is dropped.
    pub(crate) fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.cancel_handshake_timer();
        self.reader.abort();
        self.watcher.abort();
        if let Some(waiter) = self.take_waiter() {
            let _ = waiter.send(Err(PeerwireError::ConnectionClosed));
        }
    }
}

/// Read until EOF, handing each reassembled payload to the dispatch thread.
async fn read_loop(
    handle: &SchedulerHandle<Dispatcher>,
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    max_payload_size: usize,
) -> Result<()> {
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let shutdown = handle.shutdown_token().clone();

    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }

        frame_buffer.extend(&buf[..n]);
        // Frames completed before a bad length prefix are still delivered
        while let Some(payload) = frame_buffer.next_payload()? {
            handle.post(move |dispatcher| dispatcher.on_frame(id, payload));
        }
    }
}
