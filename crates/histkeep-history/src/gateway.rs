/// Debounced mirroring of a single value into a `KeyValueStore`.
///
/// Each gateway owns at most one pending save. Scheduling a new save aborts
/// the pending one while its debounce window is still open, so a burst of
/// saves produces a single write carrying the last value. When a window
/// closes, the write is handed to the gateway's writer task, which applies
/// writes and deletes one at a time in hand-over order. A write that has been
/// handed over is never cancelled or overtaken. Store calls run on tokio's
/// blocking pool. Failures go to the error observer and are never retried.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::KeyValueStore;
use crate::codec::Codec;
use crate::error::{ErrorObserver, LoadError, PersistenceError, RemoveError, SaveError};

enum WriteOp {
    Set { key: String, encoded: String },
    Delete { key: String },
}

impl WriteOp {
    fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

struct WriteRequest {
    op: WriteOp,
    /// Signalled once the op has been applied (or has failed).
    done: oneshot::Sender<()>,
}

pub struct PersistenceGateway<T> {
    backend: Arc<dyn KeyValueStore>,
    codec: Arc<dyn Codec<T>>,
    observer: ErrorObserver,
    /// Runtime the deferred work is spawned on.
    runtime: Handle,
    /// Queue of the writer task. It stops once every sender is gone.
    writes: mpsc::UnboundedSender<WriteRequest>,
    /// The task for the most recent save request, if any.
    pending: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for PersistenceGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl<T: Send + 'static> PersistenceGateway<T> {
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        codec: Arc<dyn Codec<T>>,
        observer: ErrorObserver,
        runtime: Handle,
    ) -> Self {
        let (writes, queue) = mpsc::unbounded_channel();
        runtime.spawn(run_writer(
            Arc::clone(&backend),
            Arc::clone(&observer),
            queue,
        ));
        Self {
            backend,
            codec,
            observer,
            runtime,
            writes,
            pending: None,
        }
    }

    /// Reads and decodes the record for `key`.
    ///
    /// The returned future owns everything it needs, so it can be spawned.
    pub fn load(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<T>, LoadError>> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        let codec = Arc::clone(&self.codec);
        let key = key.to_string();
        async move {
            let raw = {
                let key = key.clone();
                run_blocking(move || backend.get(&key)).await
            };
            let raw = match raw {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(source) => return Err(LoadError::Backend { key, source }),
            };
            match codec.decode(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(source) => Err(LoadError::Deserialize { key, source }),
            }
        }
    }

    /// Requests that `value` be written under `key` once `debounce` passes
    /// without another request. Supersedes any pending request.
    pub fn schedule_save(&mut self, key: &str, value: T, debounce: Duration) {
        self.cancel_pending();

        let codec = Arc::clone(&self.codec);
        let observer = Arc::clone(&self.observer);
        let writes = self.writes.clone();
        let key = key.to_string();

        self.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;

            let encoded = match codec.encode(&value) {
                Ok(encoded) => encoded,
                Err(source) => {
                    observer(&SaveError::Serialize { key, source }.into());
                    return;
                }
            };

            // From here on, aborting this task no longer stops the write.
            let _ = submit(&writes, WriteOp::Set { key, encoded }).await;
        }));
    }

    /// Deletes the record for `key` without debouncing.
    ///
    /// The delete runs after every write already handed to the writer. The
    /// returned receiver resolves once it has run; it may be dropped.
    pub fn remove(&self, key: &str) -> oneshot::Receiver<()> {
        submit(
            &self.writes,
            WriteOp::Delete {
                key: key.to_string(),
            },
        )
    }
}

impl<T> PersistenceGateway<T> {
    /// Drops the pending save if its debounce window is still open. A save
    /// already handed to the writer still runs.
    pub fn cancel_pending(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    /// Whether the latest save is still waiting for its debounce window or
    /// for its write to finish.
    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<T> Drop for PersistenceGateway<T> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Queues `op` on the writer. The receiver errors if the writer is gone.
fn submit(writes: &mpsc::UnboundedSender<WriteRequest>, op: WriteOp) -> oneshot::Receiver<()> {
    let (done, finished) = oneshot::channel();
    if let Err(rejected) = writes.send(WriteRequest { op, done }) {
        tracing::debug!(key = %rejected.0.op.key(), "Store writer has stopped, dropping write");
    }
    finished
}

/// Applies queued writes and deletes strictly one after another.
async fn run_writer(
    backend: Arc<dyn KeyValueStore>,
    observer: ErrorObserver,
    mut queue: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some(WriteRequest { op, done }) = queue.recv().await {
        let store = Arc::clone(&backend);
        match op {
            WriteOp::Set { key, encoded } => {
                let result = {
                    let key = key.clone();
                    run_blocking(move || store.set(&key, &encoded)).await
                };
                match result {
                    Ok(()) => tracing::debug!(key = %key, "Persisted current value"),
                    Err(source) => observer(&SaveError::Backend { key, source }.into()),
                }
            }
            WriteOp::Delete { key } => {
                let result = {
                    let key = key.clone();
                    run_blocking(move || store.delete(&key)).await
                };
                match result {
                    Ok(()) => tracing::debug!(key = %key, "Removed persisted value"),
                    Err(source) => {
                        observer(&PersistenceError::Remove(RemoveError::Backend { key, source }))
                    }
                }
            }
        }
        let _ = done.send(());
    }
}

/// Runs a store call on the blocking pool.
async fn run_blocking<R, F>(f: F) -> anyhow::Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> anyhow::Result<R> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Store task panicked")?
}
