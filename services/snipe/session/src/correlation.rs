//! Correlation table: one-shot reply callbacks keyed by request id.

use snipe_wire::Object;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dispatcher::DispatchError;

/// Completion callback invoked with the reply object
pub type ReplyCallback = Box<dyn FnOnce(Object) + Send + 'static>;

/// Pending one-shot replies
///
/// Every operation holds the lock only for the map operation itself; callers
/// invoke the returned callback after the lock is released.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u64, ReplyCallback>>,
}

impl CorrelationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ReplyCallback>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback; an id with a live entry is rejected
    pub fn insert(&self, id: u64, callback: ReplyCallback) -> Result<(), DispatchError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(DispatchError::DuplicateId(id));
        }
        entries.insert(id, callback);
        Ok(())
    }

    /// Remove and return the callback for `id`
    pub fn take(&self, id: u64) -> Option<ReplyCallback> {
        self.lock().remove(&id)
    }

    /// Whether `id` has a live entry
    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry without invoking it; returns how many were dropped
    pub fn clear(&self) -> usize {
        let drained: Vec<ReplyCallback> = self.lock().drain().map(|(_, cb)| cb).collect();
        // Callbacks are dropped outside the lock; their captures may own other locks
        drained.len()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish()
    }
}
