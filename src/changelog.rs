use std::sync::Mutex;

use crate::key::Key;
use crate::util::lock_recover;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Add = 1,
    Remove,
}

/// Append-only, thread-safe sequence of `(Event, Key)` pairs recording
/// the mutations applied to a table, in program order. A destination
/// table can replay a snapshot to follow a source.
#[derive(Debug, Default)]
pub struct ChangeLog {
    data: Mutex<Vec<(Event, Key)>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: Key) {
        lock_recover(&self.data, "change log").push((Event::Add, key));
    }

    pub fn remove(&self, key: Key) {
        lock_recover(&self.data, "change log").push((Event::Remove, key));
    }

    pub fn len(&self) -> usize {
        lock_recover(&self.data, "change log").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn event(&self, index: usize) -> Option<(Event, Key)> {
        lock_recover(&self.data, "change log").get(index).cloned()
    }

    /// Snapshot of all events from cursor offset `from` on.
    pub fn events_from(&self, from: usize) -> Vec<(Event, Key)> {
        let data = lock_recover(&self.data, "change log");
        if from >= data.len() {
            return Vec::new();
        }
        data[from..].to_vec()
    }

    /// Appends a snapshot taken from another log.
    pub fn append_events(&self, events: Vec<(Event, Key)>) {
        lock_recover(&self.data, "change log").extend(events);
    }
}
