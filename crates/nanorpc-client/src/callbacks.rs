//! Outstanding-callback table of a session.
//!
//! Linear scans are fine here: a session rarely has more than a handful of
//! requests in flight.  The table itself is not synchronised; the session
//! keeps it behind a single mutex and invokes callbacks outside of it.

use nanorpc_protocol::RequestType;

use crate::types::Callback;

/// A registered callback awaiting responses for `request_id`.
#[derive(Clone)]
pub struct CallbackEntry {
    pub request_id: i32,
    pub request_type: RequestType,
    pub callback: Callback,
}

impl std::fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("request_id", &self.request_id)
            .field("request_type", &self.request_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct CallbackTable {
    entries: Vec<CallbackEntry>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: CallbackEntry) {
        self.entries.push(entry);
    }

    /// Index of the entry for `request_id`.
    pub fn find(&self, request_id: i32) -> Option<usize> {
        self.entries.iter().position(|e| e.request_id == request_id)
    }

    pub fn contains(&self, request_id: i32) -> bool {
        self.find(request_id).is_some()
    }

    /// Remove and return the entry; used for one-shot responses.
    pub fn pop(&mut self, request_id: i32) -> Option<CallbackEntry> {
        let idx = self.find(request_id)?;
        Some(self.entries.remove(idx))
    }

    /// Return the entry without removing it; used for subscription updates.
    pub fn peek(&self, request_id: i32) -> Option<&CallbackEntry> {
        self.entries.iter().find(|e| e.request_id == request_id)
    }

    /// Take every entry in insertion order, leaving the table empty.
    pub fn drain(&mut self) -> Vec<CallbackEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
