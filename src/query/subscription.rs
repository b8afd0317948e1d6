//! Live query driver.
//!
//! A spawned task per subscription listens on the database's change
//! feed and re-runs the operation on every relevant event. Each run is
//! tagged with a generation; only the newest generation's result is
//! forwarded to the consumer.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::Error;
use crate::flow::ChangeEvent;
use crate::observability::metrics;
use crate::query::prepared::PreparedOperation;

/// Values buffered for a consumer that is not polling.
const OUTPUT_BUFFER: usize = 16;

type RunOutcome<V> = (u64, Result<V, Error>);

/// A live query handle.
///
/// Yields the first result right away and a fresh one after every
/// relevant change. The stream ends after the first error or as soon as
/// it is cancelled. Dropping the handle cancels it.
pub struct Subscription<V> {
    rx: ReceiverStream<Result<V, Error>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl<V: Send + 'static> Subscription<V> {
    pub(crate) fn start(operation: PreparedOperation<V>) -> Self {
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let cancel = CancellationToken::new();

        // Registered before the initial run so no commit in between is missed.
        let feed = operation.database().changes();

        tracing::debug!(
            stores = ?operation.query().stores(),
            targets = operation.observing().len(),
            "Starting live query"
        );
        tokio::spawn(drive(operation, feed, tx, cancel.clone()));

        Self {
            rx: ReceiverStream::new(rx),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

impl<V> Subscription<V> {
    /// Stop the live query. The stream ends immediately; values not yet
    /// read are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<V> Stream for Subscription<V> {
    type Item = Result<V, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return Poll::Ready(None);
        }
        self.rx.poll_next_unpin(cx)
    }
}

async fn drive<V: Send + 'static>(
    operation: PreparedOperation<V>,
    mut feed: broadcast::Receiver<ChangeEvent>,
    output: mpsc::Sender<Result<V, Error>>,
    cancel: CancellationToken,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<RunOutcome<V>>();
    let mut generation: u64 = 0;
    let mut in_flight = spawn_run(&operation, generation, done_tx.clone());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,
            () = output.closed() => break,

            event = feed.recv() => {
                match event {
                    Ok(changes) if operation.is_relevant(&changes) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Live query fell behind the change feed, re-running");
                    }
                    Err(RecvError::Closed) => break,
                }
                generation += 1;
                in_flight.abort();
                in_flight = spawn_run(&operation, generation, done_tx.clone());
            }

            Some((finished, result)) = done_rx.recv() => {
                if finished != generation {
                    tracing::trace!(finished, generation, "Discarding superseded live query result");
                    continue;
                }
                let failed = result.is_err();
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "Live query run failed, ending subscription");
                }
                if output.send(result).await.is_err() || failed {
                    break;
                }
            }
        }
    }

    in_flight.abort();
    tracing::debug!(generation, "Live query stopped");
}

fn spawn_run<V: Send + 'static>(
    operation: &PreparedOperation<V>,
    generation: u64,
    done: mpsc::UnboundedSender<RunOutcome<V>>,
) -> JoinHandle<()> {
    metrics::record_live_query_run();
    let operation = operation.clone();
    tokio::spawn(async move {
        let result = operation.execute().await;
        // The driver may already be gone.
        let _ = done.send((generation, result));
    })
}
