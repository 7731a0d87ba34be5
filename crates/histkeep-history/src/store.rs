/// Capped snapshot sequence with a movable cursor.
///
/// Snapshots are ordered oldest first. The cursor marks the active one;
/// everything after it is the redo branch, which the next new value
/// discards. When the sequence grows past capacity the oldest snapshot is
/// dropped and the cursor shifts so it keeps pointing at the same value.
use std::sync::Arc;

use crate::codec::{same_encoding, Codec};

/// Undo/redo history for a single value.
///
/// Pure in-memory structure: no I/O, no errors. Every operation is total.
pub struct HistoryStore<T> {
    /// Snapshots, oldest first. Never empty.
    snapshots: Vec<T>,
    /// Index of the active snapshot.
    cursor: usize,
    /// Max snapshots kept (at least 1).
    max_history: usize,
    /// Decides whether a new value differs from the current one.
    codec: Arc<dyn Codec<T>>,
}

impl<T> std::fmt::Debug for HistoryStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("len", &self.snapshots.len())
            .field("cursor", &self.cursor)
            .field("max_history", &self.max_history)
            .finish()
    }
}

impl<T> HistoryStore<T> {
    /// Creates a history holding just `initial`.
    ///
    /// A `max_history` of zero is treated as one.
    pub fn new(initial: T, max_history: usize, codec: Arc<dyn Codec<T>>) -> Self {
        Self {
            snapshots: vec![initial],
            cursor: 0,
            max_history: max_history.max(1),
            codec,
        }
    }

    /// Records `next` as the newest snapshot and makes it current.
    ///
    /// No-op when `next` encodes the same as the current value. Otherwise the
    /// redo branch is dropped before appending, and the oldest snapshot is
    /// evicted if the history is over capacity.
    pub fn commit(&mut self, next: T) -> &T {
        if same_encoding(self.codec.as_ref(), &next, self.current()) {
            return self.current();
        }

        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(next);
        self.cursor = self.snapshots.len() - 1;

        if self.snapshots.len() > self.max_history {
            let excess = self.snapshots.len() - self.max_history;
            self.snapshots.drain(..excess);
            self.cursor -= excess;
        }
        self.current()
    }

    /// Moves the cursor one snapshot back, if possible.
    pub fn step_back(&mut self) -> &T {
        if self.can_step_back() {
            self.cursor -= 1;
        }
        self.current()
    }

    /// Moves the cursor one snapshot forward, if possible.
    pub fn step_forward(&mut self) -> &T {
        if self.can_step_forward() {
            self.cursor += 1;
        }
        self.current()
    }

    /// Replaces the whole history with a single snapshot.
    pub fn reset(&mut self, initial: T) {
        self.snapshots.clear();
        self.snapshots.push(initial);
        self.cursor = 0;
    }

    /// The active snapshot.
    pub fn current(&self) -> &T {
        &self.snapshots[self.cursor]
    }

    pub fn can_step_back(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_step_forward(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    /// Number of snapshots held (always at least 1).
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Never true: the history always holds at least one snapshot.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// All snapshots, oldest first.
    pub fn snapshots(&self) -> &[T] {
        &self.snapshots
    }
}
