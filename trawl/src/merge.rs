//! Bounded-concurrency flat-map over a shared stream.
//!
//! [`Merge::merge`] spawns a fixed number of worker tasks on first poll. Each worker takes
//! the next item of the outer stream under a mutex, drains the inner stream
//! produced for it into a bounded channel, then takes the next item. The
//! merged output yields inner items in arrival order.
//!
//! ```ignore
//! let merged = Merge::new(4).merge(|obj| fetch_records(obj), list_objects(source, prefix));
//! ```

use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::trace;

/// Concurrency setting of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    concurrency: usize,
}

impl Merge {
    /// A concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Sequential flat-map, preserving input order.
    pub fn sequential() -> Self {
        Self::new(1)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Flat-map `outer` through `inner` with at most `concurrency` outer
    /// items in flight.
    ///
    /// Items of one inner stream keep their order. The first error, whether
    /// from `outer` or an inner stream, is yielded and ends the merged
    /// stream; workers are aborted at that point. A panicking worker
    /// surfaces as an error built from its `JoinError`.
    ///
    /// Nothing runs until the merged stream is first polled; that poll must
    /// happen within a Tokio runtime.
    pub fn merge<T, U, E, O, F, I>(&self, inner: F, outer: O) -> Merged<U, E>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: From<JoinError> + Send + 'static,
        O: Stream<Item = Result<T, E>> + Send + 'static,
        F: Fn(T) -> I + Send + Sync + 'static,
        I: Stream<Item = Result<U, E>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let concurrency = self.concurrency;
        let outer = Arc::new(Mutex::new(Box::pin(outer)));
        let inner = Arc::new(inner);
        let halted = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&halted);

        let start: Spawn = Box::new(move || {
            (0..concurrency)
                .map(|worker| {
                    tokio::spawn(drain_outer(
                        worker,
                        Arc::clone(&outer),
                        Arc::clone(&inner),
                        tx.clone(),
                        Arc::clone(&shared),
                    ))
                })
                .collect()
        });

        Merged {
            rx,
            start: Some(start),
            workers: Vec::new(),
            halted,
            done: false,
        }
    }
}

async fn drain_outer<T, U, E, O, F, I>(
    worker: usize,
    outer: Arc<Mutex<Pin<Box<O>>>>,
    inner: Arc<F>,
    tx: mpsc::Sender<Result<U, E>>,
    halted: Arc<AtomicBool>,
) where
    O: Stream<Item = Result<T, E>>,
    F: Fn(T) -> I,
    I: Stream<Item = Result<U, E>>,
{
    while !halted.load(Ordering::Acquire) {
        let next = outer.lock().await.next().await;
        let item = match next {
            Some(Ok(item)) => item,
            Some(Err(e)) => {
                halted.store(true, Ordering::Release);
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => break,
        };

        let results = inner(item);
        futures::pin_mut!(results);
        while let Some(result) = results.next().await {
            let failed = result.is_err();
            if failed {
                halted.store(true, Ordering::Release);
            }
            if tx.send(result).await.is_err() || failed {
                return;
            }
        }
    }
    trace!(worker, "Merge worker finished");
}

type Spawn = Box<dyn FnOnce() -> Vec<JoinHandle<()>> + Send>;

/// Output of [`Merge::merge`].
///
/// Workers start on the first poll. Dropping it aborts them.
pub struct Merged<U, E> {
    rx: mpsc::Receiver<Result<U, E>>,
    start: Option<Spawn>,
    workers: Vec<JoinHandle<()>>,
    halted: Arc<AtomicBool>,
    done: bool,
}

impl<U, E> Unpin for Merged<U, E> {}

impl<U, E> Merged<U, E> {
    fn halt(&mut self) {
        self.halted.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.abort();
        }
        self.done = true;
    }
}

impl<U, E: From<JoinError>> Stream for Merged<U, E> {
    type Item = Result<U, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(start) = this.start.take() {
            this.workers = start();
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(e))) => {
                this.halt();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                // Every sender is gone; a worker that panicked dropped its
                // sender without finishing.
                while let Some(worker) = this.workers.last_mut() {
                    match Pin::new(worker).poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(())) => {
                            this.workers.pop();
                        }
                        Poll::Ready(Err(e)) => {
                            this.workers.pop();
                            this.halt();
                            return Poll::Ready(Some(Err(E::from(e))));
                        }
                    }
                }
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<U, E> Drop for Merged<U, E> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
