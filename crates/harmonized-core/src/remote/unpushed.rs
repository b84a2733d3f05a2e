//! Records waiting for delivery to the remote store.

use harmonized_types::{Action, Record};

/// Queue identity of a pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKey {
    /// A record transition, one per runtime id
    Record(u64),
    /// A function call, one per transaction id
    Call(u64),
}

impl QueueKey {
    pub fn of(record: &Record) -> Option<Self> {
        if record.is_action(&Action::Function) {
            if let Some(transaction_id) = record.meta.transaction_id {
                return Some(Self::Call(transaction_id));
            }
        }
        record.meta.rt_id.map(Self::Record)
    }
}

/// Insertion-ordered. A newer transition of the same record replaces the
/// queued one in place.
#[derive(Debug, Default)]
pub struct UnpushedQueue {
    entries: Vec<(QueueKey, Record)>,
}

impl UnpushedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for records without a runtime or transaction id.
    pub fn insert(&mut self, record: Record) -> bool {
        let Some(key) = QueueKey::of(&record) else {
            return false;
        };
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = record,
            None => self.entries.push((key, record)),
        }
        true
    }

    pub fn remove(&mut self, key: QueueKey) -> Option<Record> {
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, key: QueueKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<Record> {
        self.entries.drain(..).map(|(_, record)| record).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
