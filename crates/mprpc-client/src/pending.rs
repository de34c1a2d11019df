use std::collections::HashMap;
use std::sync::Arc;

use crate::call::Call;

/// Largest counter value before the id counter wraps back to zero.
///
/// Ids handed out run `1..=MAX_CALL_ID + 1`.
pub const MAX_CALL_ID: u32 = 1 << 20;

/// Calls awaiting a terminal frame, keyed by id.
///
/// Owns the id counter so allocation and registration happen under one lock.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<u32, Arc<Call>>,
    last_id: u32,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id not currently pending.
    pub fn next_id(&mut self) -> u32 {
        loop {
            if self.last_id > MAX_CALL_ID {
                self.last_id = 0;
            }
            self.last_id += 1;
            if !self.calls.contains_key(&self.last_id) {
                return self.last_id;
            }
            tracing::trace!(id = self.last_id, "id still pending, skipping");
        }
    }

    pub fn insert(&mut self, call: Arc<Call>) {
        self.calls.insert(call.id(), call);
    }

    pub fn lookup(&self, id: u32) -> Option<Arc<Call>> {
        self.calls.get(&id).cloned()
    }

    pub fn pop(&mut self, id: u32) -> Option<Arc<Call>> {
        self.calls.remove(&id)
    }

    /// Remove `call` only if it is still the entry registered under its id.
    pub fn remove(&mut self, call: &Call) -> bool {
        let current = self
            .calls
            .get(&call.id())
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), call));
        if current {
            self.calls.remove(&call.id());
        }
        current
    }

    pub fn contains(&self, id: u32) -> bool {
        self.calls.contains_key(&id)
    }

    /// Pending ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.calls.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Remove every entry, returning them for teardown.
    pub fn drain(&mut self) -> Vec<Arc<Call>> {
        self.calls.drain().map(|(_, call)| call).collect()
    }

    #[cfg(test)]
    pub(crate) fn set_last_id(&mut self, id: u32) {
        self.last_id = id;
    }
}
