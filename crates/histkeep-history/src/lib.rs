/// Bounded undo/redo history with debounced key-value persistence.
///
/// Provides a `HistoryController` that keeps a capped sequence of past
/// values with a movable cursor, and mirrors the current value into a
/// `KeyValueStore` (in-memory or redb on disk) without blocking the caller.
/// Rapid mutations are coalesced so only the last value in each debounce
/// window is written.
pub mod backend;
pub mod codec;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod store;

pub use backend::{KeyValueStore, MemoryStore, RedbStore};
pub use codec::{Codec, CodecError, FnCodec, JsonCodec};
pub use controller::{ControllerOptions, HistoryController, Phase};
pub use error::{ErrorObserver, LoadError, OpenError, PersistenceError, RemoveError, SaveError};
pub use gateway::PersistenceGateway;
pub use store::HistoryStore;
