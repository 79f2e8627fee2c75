//! Execution scheduler.
//!
//! All protocol state lives on one dedicated OS thread that consumes a FIFO
//! queue of jobs. A job is a closure receiving `&mut S`, so state owned by
//! the thread is mutated without locks. Other threads post jobs; code already
//! running on the thread holds `&mut S` and simply calls through.
//!
//! Timers are delayed postings onto the same queue: a tokio task sleeps, then
//! posts the job, so timer callbacks observe serialized state too. Every
//! timer also watches the transport-wide shutdown token and is dropped
//! without running once it fires.
//!
//! ```text
//! reader tasks ──┐
//! timers       ──┼─► job queue ─► dispatch thread (&mut S)
//! API calls    ──┘
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A unit of work with no access to dispatcher state.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An alternative work queue: accept a task, run it later on some thread.
pub trait TaskQueue: Send + Sync + 'static {
    /// Queue `task` for execution.
    fn enqueue(&self, task: Task);
}

/// Where a route handler or response callback runs.
#[derive(Clone, Default)]
pub enum Execution {
    /// On the dedicated dispatch thread, serialized with all other traffic.
    #[default]
    Dispatcher,
    /// On tokio's blocking worker pool. Handlers may block their own thread.
    WorkerPool,
    /// On a caller-supplied queue.
    Queue(Arc<dyn TaskQueue>),
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Dispatcher => f.write_str("Dispatcher"),
            Execution::WorkerPool => f.write_str("WorkerPool"),
            Execution::Queue(_) => f.write_str("Queue"),
        }
    }
}

pub(crate) type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Job<S>),
    Stop,
}

/// Cancels a pending delayed posting.
pub(crate) struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub(crate) fn cancel(&self) {
        self.task.abort();
    }
}

/// Cloneable handle for posting work to the dispatch thread.
pub(crate) struct SchedulerHandle<S> {
    tx: mpsc::UnboundedSender<Message<S>>,
    runtime: Handle,
    shutdown: CancellationToken,
    thread_id: ThreadId,
}

impl<S> Clone for SchedulerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            runtime: self.runtime.clone(),
            shutdown: self.shutdown.clone(),
            thread_id: self.thread_id,
        }
    }
}

/// Start the dispatch thread.
///
/// `init` runs on the new thread and builds the state it owns. The thread
/// exits when [`SchedulerHandle::stop`] is called.
pub(crate) fn spawn_scheduler<S, F>(
    name: &str,
    runtime: Handle,
    shutdown: CancellationToken,
    init: F,
) -> Result<SchedulerHandle<S>>
where
    S: 'static,
    F: FnOnce(SchedulerHandle<S>) -> S + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message<S>>();

    let inner_tx = tx.clone();
    let inner_runtime = runtime.clone();
    let inner_shutdown = shutdown.clone();

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let handle = SchedulerHandle {
                tx: inner_tx,
                runtime: inner_runtime,
                shutdown: inner_shutdown,
                thread_id: thread::current().id(),
            };
            let mut state = init(handle);

            while let Some(message) = rx.blocking_recv() {
                match message {
                    Message::Run(job) => {
                        if catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
                            tracing::error!("Dispatched job panicked; continuing");
                        }
                    }
                    Message::Stop => break,
                }
            }
            tracing::debug!("Dispatch thread stopped");
        })?;

    Ok(SchedulerHandle {
        tx,
        runtime,
        shutdown,
        thread_id: thread.thread().id(),
    })
}

impl<S: 'static> SchedulerHandle<S> {
    /// Queue a job for the dispatch thread.
    pub(crate) fn post<F>(&self, job: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            tracing::debug!("Dispatch thread stopped; job dropped");
        }
    }

    /// Queue a job after `delay`, unless cancelled or shut down first.
    pub(crate) fn post_after<F>(&self, delay: Duration, job: F) -> TimerHandle
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let handle = self.clone();
        let shutdown = self.shutdown.clone();
        let task = self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => handle.post(job),
                _ = shutdown.cancelled() => {}
            }
        });
        TimerHandle { task }
    }

    /// Run `task` on the context chosen by `execution`.
    ///
    /// `Execution::Dispatcher` runs inline when already on the dispatch
    /// thread and is posted otherwise.
    pub(crate) fn execute(&self, execution: &Execution, task: Task) {
        match execution {
            Execution::Dispatcher if self.is_current_thread() => task(),
            Execution::Dispatcher => self.post(move |_| task()),
            Execution::WorkerPool => {
                self.runtime.spawn_blocking(task);
            }
            Execution::Queue(queue) => queue.enqueue(task),
        }
    }

    /// Check if the caller is running on the dispatch thread.
    #[inline]
    pub(crate) fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    #[inline]
    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    #[inline]
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Ask the dispatch thread to exit after the jobs queued so far.
    pub(crate) fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn start() -> SchedulerHandle<Vec<u32>> {
        spawn_scheduler("test-dispatch", Handle::current(), CancellationToken::new(), |_| {
            Vec::new()
        })
        .unwrap()
    }

    async fn snapshot(handle: &SchedulerHandle<Vec<u32>>) -> Vec<u32> {
        let (tx, rx) = oneshot::channel();
        handle.post(move |state| {
            let _ = tx.send(state.clone());
        });
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_jobs_run_in_fifo_order() {
        let handle = start();
        for i in 0..50 {
            handle.post(move |state| state.push(i));
        }
        assert_eq!(snapshot(&handle).await, (0..50).collect::<Vec<_>>());
        handle.stop();
    }

    #[tokio::test]
    async fn test_execute_inline_on_dispatch_thread() {
        let handle = start();
        let inner = handle.clone();
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorded = order.clone();

        handle.post(move |_| {
            assert!(inner.is_current_thread());
            let log = recorded.clone();
            inner.execute(
                &Execution::Dispatcher,
                Box::new(move || log.lock().unwrap().push("inline")),
            );
            recorded.lock().unwrap().push("after");
        });

        snapshot(&handle).await;
        assert_eq!(*order.lock().unwrap(), vec!["inline", "after"]);
        handle.stop();
    }

    #[tokio::test]
    async fn test_execute_from_outside_is_posted() {
        let handle = start();
        assert!(!handle.is_current_thread());

        let (tx, rx) = oneshot::channel();
        handle.execute(
            &Execution::Dispatcher,
            Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            }),
        );
        assert_eq!(rx.await.unwrap().as_deref(), Some("test-dispatch"));
        handle.stop();
    }

    #[tokio::test]
    async fn test_worker_pool_runs_off_dispatch_thread() {
        let handle = start();
        let (tx, rx) = oneshot::channel();
        handle.execute(
            &Execution::WorkerPool,
            Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            }),
        );
        assert_ne!(rx.await.unwrap().as_deref(), Some("test-dispatch"));
        handle.stop();
    }

    #[tokio::test]
    async fn test_custom_queue() {
        struct Immediate(Mutex<u32>);
        impl TaskQueue for Immediate {
            fn enqueue(&self, task: Task) {
                *self.0.lock().unwrap() += 1;
                task();
            }
        }

        let handle = start();
        let queue = Arc::new(Immediate(Mutex::new(0)));
        let (tx, rx) = oneshot::channel();
        handle.execute(
            &Execution::Queue(queue.clone()),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        rx.await.unwrap();
        assert_eq!(*queue.0.lock().unwrap(), 1);
        handle.stop();
    }

    #[tokio::test]
    async fn test_post_after_fires() {
        let handle = start();
        let started = std::time::Instant::now();
        let (tx, rx) = oneshot::channel();
        handle.post_after(Duration::from_millis(30), move |state| {
            state.push(7);
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(snapshot(&handle).await, vec![7]);
        handle.stop();
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_runs() {
        let handle = start();
        let (tx, rx) = oneshot::channel::<()>();
        let timer = handle.post_after(Duration::from_millis(20), move |_| {
            let _ = tx.send(());
        });
        timer.cancel();
        // Aborting drops the job and with it the sender
        assert!(rx.await.is_err());
        handle.stop();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_timers() {
        let token = CancellationToken::new();
        let handle: SchedulerHandle<Vec<u32>> =
            spawn_scheduler("test-dispatch", Handle::current(), token.clone(), |_| Vec::new())
                .unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        handle.post_after(Duration::from_secs(30), move |_| {
            let _ = tx.send(());
        });
        token.cancel();
        assert!(rx.await.is_err());
        handle.stop();
    }

    #[tokio::test]
    async fn test_panicking_job_keeps_thread_alive() {
        let handle = start();
        handle.post(|_| panic!("boom"));
        handle.post(|state| state.push(1));
        assert_eq!(snapshot(&handle).await, vec![1]);
        handle.stop();
    }
}
