//! Dedicated writer task for one connection.
//!
//! Frames are queued on an unbounded mpsc channel and written by a single
//! task, so the order of `send` calls is the order of bytes on the socket.
//! Queuing never blocks, which lets the dispatch thread send without
//! entering the runtime.
//!
//! # Architecture
//!
//! ```text
//! Dispatch thread ─┐
//! Worker pool    ──┼─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► Socket
//! ```
//!
//! Multiple ready frames are batched into a single `write_vectored` call.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PeerwireError, Result};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Receiving side of a writer channel, consumed by [`writer_loop`].
pub(crate) struct WriterQueue {
    rx: mpsc::UnboundedReceiver<Bytes>,
    pending: Arc<AtomicUsize>,
}

/// Handle for queuing complete frames (prefix included) on a connection.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame. Never waits.
    pub(crate) fn send(&self, frame: Bytes) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            PeerwireError::ConnectionClosed
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Create a connected handle/queue pair.
pub(crate) fn writer_channel() -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        WriterHandle {
            tx,
            pending: pending.clone(),
        },
        WriterQueue { rx, pending },
    )
}

/// Spawn the writer task on `runtime` and return a handle for sending frames.
pub(crate) fn spawn_writer_task<W>(
    runtime: &Handle,
    writer: W,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (handle, queue) = writer_channel();
    let task = runtime.spawn(writer_loop(queue, writer));
    (handle, task)
}

/// Main writer loop - receives frames and writes them to the socket.
///
/// Returns `Ok(())` once every handle has been dropped and the queue is
/// drained; the write half is shut down at that point.
pub(crate) async fn writer_loop<W>(mut queue: WriterQueue, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = queue.rx.recv().await {
        batch.clear();
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match queue.rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
        queue.pending.fetch_sub(batch.len(), Ordering::Release);
    }

    // Peer may already be gone; nothing left to report.
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O, continuing after
/// partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(PeerwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end && !frame.is_empty() {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start_in_frame..]));
        }
        offset = end;
    }

    slices
}
