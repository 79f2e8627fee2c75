//! TCP bind, dial and accept.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::connection::ListenerId;
use crate::dispatcher::Dispatcher;
use crate::error::{PeerwireError, Result};
use crate::scheduler::SchedulerHandle;

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Resolve `addr` to its first socket address.
pub(crate) async fn resolve(addr: &str) -> Result<SocketAddr> {
    let mut addrs = lookup_host(addr)
        .await
        .map_err(|_| PeerwireError::UnknownHost(addr.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| PeerwireError::UnknownHost(addr.to_string()))
}

pub(crate) async fn bind(addr: &str) -> Result<TcpListener> {
    let target = resolve(addr).await?;
    Ok(TcpListener::bind(target).await?)
}

/// Open a TCP connection to `addr` within `timeout`.
pub(crate) async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let target = resolve(addr).await?;
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(PeerwireError::ConnectTimeout),
    }
}

/// Hand every accepted socket to the dispatch thread until `stop` fires.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    id: ListenerId,
    handle: SchedulerHandle<Dispatcher>,
    stop: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                tracing::trace!("Accepted socket from {}", remote);
                handle.post(move |dispatcher| dispatcher.on_accepted(id, stream));
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    tracing::debug!("Accept loop stopped");
}
