//! Identity registry: three lookup tables over one set of record handles.
//!
//! Handles live in the runtime-id table. The store-id and server-id tables map
//! a foreign key to the runtime id of the handle that owns it. Whenever a key
//! sits in a table, the owning handle's `meta` carries that same key.
//!
//! Only the router mutates a registry.


use harmonized_types::{Action, Meta, Record, RecordKey, SyncError};
use std::collections::HashMap;
use std::fmt;

/// Which table produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    RtId,
    StoreId,
    ServerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyTable {
    Store,
    Server,
}

impl fmt::Display for KeyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Store => write!(f, "store"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Snapshot of the handle after the merge
    pub record: Record,
    /// A new handle was allocated
    pub created: bool,
    pub matched_by: Option<MatchedBy>,
    /// The handle's store id changed
    pub gained_store_id: bool,
    /// The handle's server id changed
    pub gained_server_id: bool,
    /// Keys taken over from other handles
    pub conflicts: Vec<SyncError>,
}

impl Reconciled {
    pub fn rt_id(&self) -> u64 {
        self.record.meta.rt_id.unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct IdentityRegistry {
    handles: HashMap<u64, Record>,
    by_store: HashMap<RecordKey, u64>,
    by_server: HashMap<RecordKey, u64>,
    next_rt_id: u64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            by_store: HashMap::new(),
            by_server: HashMap::new(),
            next_rt_id: 1,
        }
    }

    /// Find the handle for `meta`: runtime id first, then store id, then server id.
    pub fn lookup(&self, meta: &Meta) -> Option<(u64, MatchedBy)> {
        if let Some(rt_id) = meta.rt_id {
            if self.handles.contains_key(&rt_id) {
                return Some((rt_id, MatchedBy::RtId));
            }
        }
        if let Some(rt_id) = meta.store_id.as_ref().and_then(|key| self.by_store.get(key)) {
            return Some((*rt_id, MatchedBy::StoreId));
        }
        if let Some(rt_id) = meta.server_id.as_ref().and_then(|key| self.by_server.get(key)) {
            return Some((*rt_id, MatchedBy::ServerId));
        }
        None
    }

    /// Match `incoming` to a handle (creating one if needed), merge its ids and
    /// overwrite the handle's data. Delete transitions keep the stored data.
    pub fn reconcile(&mut self, incoming: &Record) -> Reconciled {
        match self.lookup(&incoming.meta) {
            Some((rt_id, matched_by)) => self.merge_into(rt_id, matched_by, incoming),
            None => self.create(incoming),
        }
    }

    fn create(&mut self, incoming: &Record) -> Reconciled {
        let rt_id = self.allocate(incoming.meta.rt_id);
        let meta = Meta {
            rt_id: Some(rt_id),
            store_id: incoming.meta.store_id.clone(),
            server_id: incoming.meta.server_id.clone(),
            action: incoming.meta.action.clone(),
            transaction_id: None,
            deleted: incoming.meta.deleted,
        };
        if let Some(key) = &meta.store_id {
            self.by_store.insert(key.clone(), rt_id);
        }
        if let Some(key) = &meta.server_id {
            self.by_server.insert(key.clone(), rt_id);
        }
        let record = Record { data: incoming.data.clone(), meta };
        self.handles.insert(rt_id, record.clone());

        Reconciled {
            gained_store_id: record.meta.store_id.is_some(),
            gained_server_id: record.meta.server_id.is_some(),
            record,
            created: true,
            matched_by: None,
            conflicts: Vec::new(),
        }
    }

    /// Honor an explicit runtime id only if it is above everything handed out so far.
    fn allocate(&mut self, requested: Option<u64>) -> u64 {
        let rt_id = match requested {
            Some(rt_id) if rt_id >= self.next_rt_id => rt_id,
            _ => self.next_rt_id,
        };
        self.next_rt_id = rt_id + 1;
        rt_id
    }

    fn merge_into(&mut self, rt_id: u64, matched_by: MatchedBy, incoming: &Record) -> Reconciled {
        let mut conflicts = Vec::new();
        let gained_store_id =
            self.claim(KeyTable::Store, incoming.meta.store_id.as_ref(), rt_id, &mut conflicts);
        let gained_server_id =
            self.claim(KeyTable::Server, incoming.meta.server_id.as_ref(), rt_id, &mut conflicts);

        let record = match self.handles.get_mut(&rt_id) {
            Some(handle) => {
                let is_delete = incoming.action().is_some_and(Action::is_delete);
                if !is_delete {
                    handle.data = incoming.data.clone();
                }
                if incoming.meta.action.is_some() {
                    handle.meta.action = incoming.meta.action.clone();
                }
                handle.meta.deleted |= incoming.meta.deleted;
                handle.clone()
            },
            None => Record::default(),
        };

        Reconciled {
            record,
            created: false,
            matched_by: Some(matched_by),
            gained_store_id,
            gained_server_id,
            conflicts,
        }
    }

    /// Point `key` at `rt_id` in `table`. A key owned by another handle is taken
    /// over and stripped from that handle. Returns true if the handle's key changed.
    fn claim(
        &mut self,
        table: KeyTable,
        key: Option<&RecordKey>,
        rt_id: u64,
        conflicts: &mut Vec<SyncError>,
    ) -> bool {
        let Some(key) = key else {
            return false;
        };
        let index = match table {
            KeyTable::Store => &mut self.by_store,
            KeyTable::Server => &mut self.by_server,
        };

        if let Some(owner) = index.get(key).copied() {
            if owner == rt_id {
                return false;
            }
            if let Some(loser) = self.handles.get_mut(&owner) {
                *key_slot(&mut loser.meta, table) = None;
            }
            tracing::warn!(
                "⚠️ Identity conflict: {} id {} moves from handle {} to handle {}",
                table,
                key,
                owner,
                rt_id
            );
            conflicts.push(SyncError::IdentityConflict {
                table: table.to_string(),
                key: key.to_string(),
                kept: rt_id,
                displaced: owner,
            });
        }

        let Some(handle) = self.handles.get_mut(&rt_id) else {
            return false;
        };
        let previous = key_slot(&mut handle.meta, table).replace(key.clone());
        if let Some(previous) = &previous {
            if previous != key {
                index.remove(previous);
            }
        }
        index.insert(key.clone(), rt_id);
        previous.as_ref() != Some(key)
    }

    pub fn get(&self, rt_id: u64) -> Option<&Record> {
        self.handles.get(&rt_id)
    }

    pub fn get_by_store_id(&self, key: &RecordKey) -> Option<&Record> {
        self.by_store.get(key).and_then(|rt_id| self.handles.get(rt_id))
    }

    pub fn get_by_server_id(&self, key: &RecordKey) -> Option<&Record> {
        self.by_server.get(key).and_then(|rt_id| self.handles.get(rt_id))
    }

    /// Every handle once, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Flag a pending deletion.
    pub fn mark_deleted(&mut self, rt_id: u64) -> Option<&Record> {
        let handle = self.handles.get_mut(&rt_id)?;
        handle.meta.deleted = true;
        Some(handle)
    }

    /// Drop a handle and every table entry pointing at it.
    pub fn remove(&mut self, rt_id: u64) -> Option<Record> {
        let handle = self.handles.remove(&rt_id)?;
        if let Some(key) = &handle.meta.store_id {
            if self.by_store.get(key) == Some(&rt_id) {
                self.by_store.remove(key);
            }
        }
        if let Some(key) = &handle.meta.server_id {
            if self.by_server.get(key) == Some(&rt_id) {
                self.by_server.remove(key);
            }
        }
        Some(handle)
    }

    /// Runtime id the next new handle will get.
    pub fn next_rt_id(&self) -> u64 {
        self.next_rt_id
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn key_slot(meta: &mut Meta, table: KeyTable) -> &mut Option<RecordKey> {
    match table {
        KeyTable::Store => &mut meta.store_id,
        KeyTable::Server => &mut meta.server_id,
    }
}
