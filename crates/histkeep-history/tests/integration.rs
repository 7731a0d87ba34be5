// Integration tests for the history system.
//
// These exercise full workflows spanning the HistoryController, the
// debounced gateway and real backing stores, using short real-time
// debounce windows.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use histkeep_history::{
    Codec, ControllerOptions, FnCodec, HistoryController, KeyValueStore, LoadError, MemoryStore,
    PersistenceError, Phase, RedbStore, RemoveError, SaveError,
};

const DEBOUNCE_MS: u64 = 40;

/// Long enough for a debounce window plus the blocking-pool write.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 6)).await;
}

/// Memory store that records every write and delete it receives.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    sets: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
    get_delay: Option<Duration>,
    /// Value whose write blocks for the given time.
    slow_set: Option<(&'static str, Duration)>,
}

impl CountingStore {
    fn sets(&self) -> Vec<(String, String)> {
        self.sets.lock().unwrap().clone()
    }

    fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

impl KeyValueStore for CountingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(delay) = self.get_delay {
            std::thread::sleep(delay);
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some((slow, delay)) = self.slow_set {
            if value == slow {
                std::thread::sleep(delay);
            }
        }
        self.sets
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        self.inner.delete(key)
    }
}

/// Store whose every call fails, like an unavailable backend.
struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("store unavailable"))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("quota exceeded"))
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Err(anyhow!("store unavailable"))
    }
}

/// Observed failures as `(kind, message)` pairs.
type Seen = Arc<Mutex<Vec<(&'static str, String)>>>;

fn kind(err: &PersistenceError) -> &'static str {
    match err {
        PersistenceError::Load(LoadError::Deserialize { .. }) => "load-decode",
        PersistenceError::Load(LoadError::Backend { .. }) => "load-backend",
        PersistenceError::Save(SaveError::Serialize { .. }) => "save-encode",
        PersistenceError::Save(SaveError::Backend { .. }) => "save-backend",
        PersistenceError::Remove(RemoveError::Backend { .. }) => "remove-backend",
    }
}

fn options(key: &str, initial: &str, seen: &Seen) -> ControllerOptions<String> {
    let sink = Arc::clone(seen);
    ControllerOptions::new(key, initial.to_string())
        .debounce_ms(DEBOUNCE_MS)
        .on_error(move |err| sink.lock().unwrap().push((kind(err), err.to_string())))
}

fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

// ── Persistence Round-Trip ─────────────────────────────────────────────

#[tokio::test]
async fn test_round_trip_through_redb() {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path()).unwrap();
    let errors = seen();

    let mut ctl = HistoryController::open(options("doc", "", &errors), store.clone()).unwrap();
    ctl.ready().await;
    ctl.update("hello".to_string());
    ctl.update("hello world".to_string());
    settle().await;
    ctl.dispose();

    let fresh = HistoryController::open(options("doc", "", &errors), store.clone()).unwrap();
    fresh.ready().await;
    assert_eq!(fresh.data(), "hello world");
    // Only the current value is persisted, not the history.
    assert_eq!(fresh.history_length(), 1);
    assert!(!fresh.can_undo());
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_round_trip_survives_reopening_database() {
    let dir = tempfile::tempdir().unwrap();
    let errors = seen();

    {
        let store = RedbStore::open(dir.path()).unwrap();
        let mut ctl = HistoryController::open(options("doc", "a", &errors), store).unwrap();
        ctl.update("b".to_string());
        settle().await;
    }
    // Let the store writer wind down and release the database file.
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;

    let store = RedbStore::open(dir.path()).unwrap();
    let ctl = HistoryController::open(options("doc", "a", &errors), store).unwrap();
    ctl.ready().await;
    assert_eq!(ctl.data(), "b");
}

#[tokio::test]
async fn test_undo_position_is_persisted() {
    let store = MemoryStore::new();
    let errors = seen();

    let mut ctl = HistoryController::open(options("doc", "a", &errors), store.clone()).unwrap();
    ctl.update("b".to_string());
    ctl.update("c".to_string());
    ctl.undo();
    settle().await;

    assert_eq!(store.get("doc").unwrap().as_deref(), Some(r#""b""#));
}

// ── Debounce Coalescing ────────────────────────────────────────────────

#[tokio::test]
async fn test_rapid_updates_write_once_with_last_value() {
    let store = Arc::new(CountingStore::default());
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "0", &errors), store.clone()).unwrap();
    ctl.update("1".to_string());
    ctl.update("2".to_string());
    ctl.update("3".to_string());
    assert!(ctl.has_pending_write());
    settle().await;

    assert_eq!(store.sets(), vec![("k".to_string(), r#""3""#.to_string())]);
    assert!(!ctl.has_pending_write());
}

#[tokio::test]
async fn test_separate_windows_write_separately() {
    let store = Arc::new(CountingStore::default());
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "0", &errors), store.clone()).unwrap();
    ctl.update("1".to_string());
    settle().await;
    ctl.update("2".to_string());
    settle().await;

    let values: Vec<String> = store.sets().into_iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![r#""1""#, r#""2""#]);
}

// ── Write Ordering ─────────────────────────────────────────────────────

fn slow_a_store() -> Arc<CountingStore> {
    Arc::new(CountingStore {
        slow_set: Some((r#""a""#, Duration::from_millis(200))),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_slow_write_never_overwrites_newer_value() {
    let store = slow_a_store();
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "0", &errors), store.clone()).unwrap();
    ctl.update("a".to_string());
    // The write of "a" has started and is stuck in the store.
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS + 40)).await;
    ctl.update("b".to_string());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(ctl.data(), "b");
    assert_eq!(store.get("k").unwrap().as_deref(), Some(r#""b""#));
    let values: Vec<String> = store.sets().into_iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![r#""a""#, r#""b""#]);
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_during_slow_write_keeps_record_deleted() {
    let store = slow_a_store();
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "init", &errors), store.clone()).unwrap();
    ctl.update("a".to_string());
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS + 40)).await;
    ctl.clear();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(store.get("k").unwrap().is_none());
    assert_eq!(store.deletes(), vec!["k".to_string()]);
    ctl.dispose();

    let fresh = HistoryController::open(options("k", "init", &errors), store.clone()).unwrap();
    fresh.ready().await;
    assert_eq!(fresh.data(), "init");
}

#[tokio::test]
async fn test_pending_write_covers_slow_store() {
    let store = slow_a_store();
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "0", &errors), store.clone()).unwrap();
    ctl.update("a".to_string());
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS + 40)).await;
    assert!(ctl.has_pending_write());
    assert!(store.get("k").unwrap().is_none());

    while ctl.has_pending_write() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.get("k").unwrap().as_deref(), Some(r#""a""#));
}

// ── Clear and Dispose ──────────────────────────────────────────────────

#[tokio::test]
async fn test_clear_deletes_record_and_drops_pending_write() {
    let store = Arc::new(CountingStore::default());
    store.inner.set("k", r#""old""#).unwrap();
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "init", &errors), store.clone()).unwrap();
    ctl.ready().await;
    assert_eq!(ctl.data(), "old");

    ctl.update("new".to_string());
    ctl.clear();
    assert_eq!(ctl.data(), "init");
    assert_eq!(ctl.history_length(), 1);
    assert!(!ctl.can_undo());
    assert!(!ctl.can_redo());
    settle().await;

    assert_eq!(store.deletes(), vec!["k".to_string()]);
    assert!(store.sets().is_empty());
    assert!(store.get("k").unwrap().is_none());
}

#[tokio::test]
async fn test_dispose_discards_pending_write() {
    let store = Arc::new(CountingStore::default());
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "a", &errors), store.clone()).unwrap();
    ctl.update("b".to_string());
    ctl.dispose();
    settle().await;

    assert!(store.sets().is_empty());
}

// ── Load Race ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_mutation_wins_over_slow_load() {
    let store = Arc::new(CountingStore {
        get_delay: Some(Duration::from_millis(DEBOUNCE_MS * 2)),
        ..Default::default()
    });
    store.inner.set("k", r#""stale""#).unwrap();
    let errors = seen();

    let mut ctl = HistoryController::open(options("k", "init", &errors), store.clone()).unwrap();
    assert_eq!(ctl.phase(), Phase::Initializing);
    ctl.update("fresh".to_string());

    ctl.ready().await;
    assert_eq!(ctl.phase(), Phase::Ready);
    assert_eq!(ctl.data(), "fresh");
    assert_eq!(ctl.history_length(), 2);

    ctl.undo();
    assert_eq!(ctl.data(), "init");
}

#[tokio::test]
async fn test_untouched_history_takes_loaded_value() {
    let store = Arc::new(CountingStore {
        get_delay: Some(Duration::from_millis(DEBOUNCE_MS)),
        ..Default::default()
    });
    store.inner.set("k", r#""persisted""#).unwrap();
    let errors = seen();

    let ctl = HistoryController::open(options("k", "init", &errors), store.clone()).unwrap();
    assert_eq!(ctl.data(), "init");
    ctl.ready().await;
    assert_eq!(ctl.data(), "persisted");
}

// ── Failure Handling ───────────────────────────────────────────────────

#[tokio::test]
async fn test_broken_backend_never_breaks_history() {
    let errors = seen();

    let mut ctl =
        HistoryController::open(options("k", "init", &errors), Arc::new(BrokenStore)).unwrap();
    ctl.ready().await;
    assert_eq!(ctl.data(), "init");

    ctl.update("a".to_string());
    ctl.update("b".to_string());
    ctl.undo();
    assert_eq!(ctl.data(), "a");
    settle().await;
    ctl.clear();
    settle().await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 3, "load, save and remove failures: {errors:?}");
    assert_eq!(errors[0].0, "load-backend");
    assert_eq!(errors[1].0, "save-backend");
    assert!(errors[1].1.contains("quota exceeded"));
    assert_eq!(errors[2].0, "remove-backend");
    assert!(errors[2].1.contains("failed to delete 'k'"));
}

#[tokio::test]
async fn test_undecodable_record_falls_back_to_initial() {
    let store = MemoryStore::new();
    store.set("k", "{ not json").unwrap();
    let errors = seen();

    let ctl = HistoryController::open(options("k", "init", &errors), store).unwrap();
    ctl.ready().await;

    assert_eq!(ctl.data(), "init");
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "load-decode");
}

// ── Configuration ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_persistence_disabled_never_touches_store() {
    let store = Arc::new(CountingStore::default());
    store.inner.set("k", r#""persisted""#).unwrap();
    let errors = seen();

    let mut ctl =
        HistoryController::open(options("k", "init", &errors).persist(false), store.clone())
            .unwrap();
    assert_eq!(ctl.phase(), Phase::Ready);
    ctl.ready().await;
    assert_eq!(ctl.data(), "init");

    ctl.update("a".to_string());
    ctl.clear();
    settle().await;

    assert!(store.sets().is_empty());
    assert!(store.deletes().is_empty());
}

#[tokio::test]
async fn test_custom_codec_controls_equality_and_format() {
    // Case-insensitive text: "Hello" and "HELLO" are the same snapshot.
    fn codec() -> Arc<dyn Codec<String>> {
        Arc::new(FnCodec::new(
            |s: &String| Ok(s.to_lowercase()),
            |raw: &str| Ok(raw.to_string()),
        ))
    }

    let store = MemoryStore::new();
    let mut ctl = HistoryController::open(
        ControllerOptions::with_codec("k", String::new(), codec()).debounce_ms(DEBOUNCE_MS),
        store.clone(),
    )
    .unwrap();

    ctl.update("Hello".to_string());
    ctl.update("HELLO".to_string());
    assert_eq!(ctl.history_length(), 2);
    assert_eq!(ctl.data(), "Hello");
    settle().await;

    assert_eq!(store.get("k").unwrap().as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_controllers_on_different_keys_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path()).unwrap();
    let errors = seen();

    let mut a = HistoryController::open(options("doc-a", "", &errors), store.clone()).unwrap();
    let mut b = HistoryController::open(options("doc-b", "", &errors), store.clone()).unwrap();
    a.update("alpha".to_string());
    b.update("beta".to_string());
    settle().await;

    a.clear();
    settle().await;

    assert!(store.get("doc-a").unwrap().is_none());
    assert_eq!(store.get("doc-b").unwrap().as_deref(), Some(r#""beta""#));
    let mut keys = store.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["doc-b"]);
}
