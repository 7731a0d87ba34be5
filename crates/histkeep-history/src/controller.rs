/// Public undo/redo surface with best-effort persistence.
///
/// A `HistoryController` owns one `HistoryStore` and, when persistence is
/// on, one `PersistenceGateway`. Every operation mutates the in-memory
/// history synchronously and returns; persisting the new current value
/// happens later on the runtime. The in-memory history is authoritative:
/// storage failures are reported to the error observer and never returned.
///
/// On open, a persisted value for the storage key is loaded in the
/// background. It replaces the initial value only if the caller hasn't
/// changed the history in the meantime; otherwise it is stale and dropped.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use histkeep_config::HistoryConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::KeyValueStore;
use crate::codec::{Codec, JsonCodec};
use crate::error::{log_error, ErrorObserver, OpenError, PersistenceError};
use crate::gateway::PersistenceGateway;
use crate::store::HistoryStore;

/// Lifecycle of a controller.
///
/// Teardown has no variant: `dispose` consumes the controller, so nothing
/// can observe or mutate it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The initial load hasn't resolved yet. The history is usable.
    Initializing,
    /// Steady state.
    Ready,
}

/// Everything needed to open a controller.
pub struct ControllerOptions<T> {
    /// Backing-store key for the current value.
    pub storage_key: String,
    /// Seed value, and what `clear` resets to.
    pub initial_data: T,
    pub config: HistoryConfig,
    pub codec: Arc<dyn Codec<T>>,
    pub on_error: ErrorObserver,
}

impl<T> ControllerOptions<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Options with the default config and the JSON codec.
    pub fn new(storage_key: impl Into<String>, initial_data: T) -> Self {
        Self::with_codec(storage_key, initial_data, Arc::new(JsonCodec::<T>::new()))
    }
}

impl<T> ControllerOptions<T> {
    /// Options with the default config and a caller-supplied codec.
    pub fn with_codec(
        storage_key: impl Into<String>,
        initial_data: T,
        codec: Arc<dyn Codec<T>>,
    ) -> Self {
        Self {
            storage_key: storage_key.into(),
            initial_data,
            config: HistoryConfig::default(),
            codec,
            on_error: Arc::new(log_error),
        }
    }

    pub fn config(mut self, config: HistoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_history(mut self, max_history: usize) -> Self {
        self.config.max_history = max_history;
        self
    }

    pub fn debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.config.debounce_ms = debounce_ms;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.config.persist = persist;
        self
    }

    pub fn on_error(
        mut self,
        observer: impl Fn(&PersistenceError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Arc::new(observer);
        self
    }
}

/// State shared with the background load.
struct Shared<T> {
    store: HistoryStore<T>,
    /// Set once the caller has changed the history. A late load never
    /// overwrites a touched history.
    touched: bool,
}

pub struct HistoryController<T> {
    shared: Arc<Mutex<Shared<T>>>,
    /// `None` when persistence is disabled.
    gateway: Option<PersistenceGateway<T>>,
    storage_key: String,
    initial_data: T,
    debounce: Duration,
    phase: watch::Receiver<Phase>,
    load_task: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for HistoryController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryController")
            .field("storage_key", &self.storage_key)
            .field("phase", &*self.phase.borrow())
            .field("persist", &self.gateway.is_some())
            .finish()
    }
}

impl<T> HistoryController<T>
where
    T: Clone + Send + 'static,
{
    /// Opens a controller over `backend`.
    ///
    /// With persistence on, this must run inside a tokio runtime: the
    /// initial load and later writes are spawned on it. With persistence
    /// off the backend is never touched and no runtime is needed.
    ///
    /// # Errors
    ///
    /// Returns `OpenError::NoRuntime` if persistence is on and no tokio
    /// runtime is current.
    pub fn open(
        options: ControllerOptions<T>,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Self, OpenError> {
        let ControllerOptions {
            storage_key,
            initial_data,
            mut config,
            codec,
            on_error,
        } = options;
        config.sanitize();

        let store = HistoryStore::new(
            initial_data.clone(),
            config.max_history,
            Arc::clone(&codec),
        );
        let shared = Arc::new(Mutex::new(Shared {
            store,
            touched: false,
        }));

        if !config.persist {
            let (_, phase) = watch::channel(Phase::Ready);
            return Ok(Self {
                shared,
                gateway: None,
                storage_key,
                initial_data,
                debounce: config.debounce(),
                phase,
                load_task: None,
            });
        }

        let runtime = Handle::try_current()?;
        let gateway =
            PersistenceGateway::new(backend, codec, Arc::clone(&on_error), runtime.clone());
        let (phase_tx, phase) = watch::channel(Phase::Initializing);

        let load = gateway.load(&storage_key);
        let load_shared = Arc::clone(&shared);
        let key = storage_key.clone();
        let load_task = runtime.spawn(async move {
            let outcome = load.await;
            let failure = {
                let mut shared = load_shared.lock().unwrap_or_else(PoisonError::into_inner);
                match outcome {
                    Ok(Some(value)) if !shared.touched => {
                        shared.store.reset(value);
                        tracing::debug!(key = %key, "Restored persisted value");
                        None
                    }
                    Ok(Some(_)) => {
                        tracing::debug!(
                            key = %key,
                            "History changed during load, dropping persisted value"
                        );
                        None
                    }
                    Ok(None) => None,
                    Err(err) => Some(err),
                }
            };
            if let Some(err) = failure {
                on_error(&err.into());
            }
            let _ = phase_tx.send(Phase::Ready);
        });

        Ok(Self {
            shared,
            gateway: Some(gateway),
            storage_key,
            initial_data,
            debounce: config.debounce(),
            phase,
            load_task: Some(load_task),
        })
    }

    /// Records `next` as the new current value.
    pub fn update(&mut self, next: T) {
        self.update_with(move |_| next);
    }

    /// Records the value computed from the current one.
    pub fn update_with(&mut self, updater: impl FnOnce(&T) -> T) {
        let current = {
            let mut shared = self.lock();
            let next = updater(shared.store.current());
            shared.touched = true;
            shared.store.commit(next).clone()
        };
        self.persist(current);
    }

    /// Steps back one snapshot. No-op at the oldest snapshot.
    pub fn undo(&mut self) {
        let current = {
            let mut shared = self.lock();
            if !shared.store.can_step_back() {
                return;
            }
            shared.touched = true;
            shared.store.step_back().clone()
        };
        self.persist(current);
    }

    /// Steps forward one snapshot. No-op at the newest snapshot.
    pub fn redo(&mut self) {
        let current = {
            let mut shared = self.lock();
            if !shared.store.can_step_forward() {
                return;
            }
            shared.touched = true;
            shared.store.step_forward().clone()
        };
        self.persist(current);
    }

    /// Resets the history to the initial value and deletes the persisted
    /// record right away. A save still inside its debounce window is dropped;
    /// one already being written lands before the delete.
    pub fn clear(&mut self) {
        {
            let mut shared = self.lock();
            shared.store.reset(self.initial_data.clone());
            shared.touched = true;
        }
        if let Some(gateway) = &mut self.gateway {
            gateway.cancel_pending();
            drop(gateway.remove(&self.storage_key));
        }
    }

    /// Tears the controller down. A save still inside its debounce window is
    /// discarded, not flushed.
    pub fn dispose(self) {
        tracing::debug!(key = %self.storage_key, "Disposing history controller");
    }

    fn persist(&mut self, value: T) {
        if let Some(gateway) = &mut self.gateway {
            gateway.schedule_save(&self.storage_key, value, self.debounce);
        }
    }
}

impl<T> HistoryController<T> {
    /// Resolves once the initial load has settled.
    pub async fn ready(&self) {
        if self.phase() == Phase::Ready {
            return;
        }
        let mut phase = self.phase.clone();
        // An error means the load task is gone, so there is nothing to wait for.
        let _ = phase.wait_for(|p| *p == Phase::Ready).await;
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn can_undo(&self) -> bool {
        self.lock().store.can_step_back()
    }

    pub fn can_redo(&self) -> bool {
        self.lock().store.can_step_forward()
    }

    /// Index of the current snapshot.
    pub fn current_index(&self) -> usize {
        self.lock().store.cursor()
    }

    pub fn history_length(&self) -> usize {
        self.lock().store.len()
    }

    /// Whether the latest save is still debouncing or being written.
    pub fn has_pending_write(&self) -> bool {
        self.gateway
            .as_ref()
            .is_some_and(PersistenceGateway::has_pending)
    }

    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> HistoryController<T> {
    /// The current value.
    pub fn data(&self) -> T {
        self.lock().store.current().clone()
    }
}

impl<T> Drop for HistoryController<T> {
    fn drop(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        // Dropping the gateway cancels a save that is still debouncing.
    }
}
