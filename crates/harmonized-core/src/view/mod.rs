//! Presentation adapter: an owned, UI-shaped view over a model.
//!
//! The collection pulls reconciled records from the model's presentation
//! stream on [`ViewCollection::sync`], projects them through `map_down`, and
//! maps edits back through `map_up` on save. Function results never show up as
//! items; they reach callers through [`FunctionCall`].

mod call;

#[cfg(test)]
mod tests;

pub use call::{CallEvent, FunctionCall};

use harmonized_types::{Action, Data, Record, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::model::Model;

/// Projects a canonical record into view data.
pub type MapDown = Arc<dyn Fn(&Record) -> Data + Send + Sync>;
/// Maps view data back into canonical record data.
pub type MapUp = Arc<dyn Fn(&Data) -> Data + Send + Sync>;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, Ordering::Relaxed)
}

/// One entry of a view. `uid` is unique per process and survives saves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewItem {
    pub uid: u64,
    /// `None` until the item is saved for the first time
    pub rt_id: Option<u64>,
    /// Bumped on every change seen by the view
    pub version: u64,
    pub data: Data,
}

impl ViewItem {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }
}

pub struct ViewCollection {
    model: Arc<Model>,
    items: Vec<ViewItem>,
    changes: broadcast::Receiver<Record>,
    map_down: MapDown,
    map_up: MapUp,
}

impl ViewCollection {
    /// A view holding every live record of `model`, with identity mappings.
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_mappers(model, Arc::new(|record: &Record| record.data.clone()), Arc::new(Data::clone))
    }

    pub fn with_mappers(model: Arc<Model>, map_down: MapDown, map_up: MapUp) -> Self {
        let changes = model.subscribe();
        let mut view = Self { model, items: Vec::new(), changes, map_down, map_up };
        view.rebuild();
        view
    }

    /// Apply every record the model presented since the last call. Returns
    /// how many were applied.
    pub fn sync(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.changes.try_recv() {
                Ok(record) => {
                    if self.apply(&record) {
                        applied += 1;
                    }
                },
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("View fell {} records behind, rebuilding", skipped);
                    self.rebuild();
                    applied += 1;
                },
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        applied
    }

    /// Start showing the record `rt_id`. Returns the item if the model knows it.
    pub fn add_item(&mut self, rt_id: u64) -> Option<&ViewItem> {
        if let Some(index) = self.position_by_rt_id(rt_id) {
            return self.items.get(index);
        }
        let record = self.model.get_item(rt_id)?;
        let item = ViewItem { uid: next_uid(), rt_id: Some(rt_id), version: 0, data: (self.map_down)(&record) };
        self.items.push(item);
        self.items.last()
    }

    /// A fresh unsaved item. `add` also appends it to the view.
    pub fn new_item(&mut self, data: Data, add: bool) -> ViewItem {
        let item = ViewItem { uid: next_uid(), rt_id: None, version: 0, data };
        if add {
            self.items.push(item.clone());
        }
        item
    }

    /// Send `item` to the model as a `save` and return the view's updated copy.
    pub fn save(&mut self, item: &ViewItem) -> Result<ViewItem, SyncError> {
        let mut record = Record::new((self.map_up)(&item.data)).with_action(Action::Save);
        record.meta.rt_id = item.rt_id;
        let sent = self.model.send(record)?;

        let updated = ViewItem {
            uid: item.uid,
            rt_id: sent.meta.rt_id,
            version: item.version + 1,
            data: (self.map_down)(&sent),
        };
        match self.items.iter_mut().find(|existing| existing.uid == item.uid) {
            Some(existing) => *existing = updated.clone(),
            None => self.items.push(updated.clone()),
        }
        Ok(updated)
    }

    /// Remove `item` from the view and, if it was ever saved, delete it.
    pub fn delete(&mut self, item: &ViewItem) -> Result<(), SyncError> {
        self.items.retain(|existing| existing.uid != item.uid);
        if let Some(rt_id) = item.rt_id {
            self.model.delete(rt_id)?;
        }
        Ok(())
    }

    /// Fetch from the server. New records appear after the next [`sync`](Self::sync).
    pub async fn fetch(&self) -> Result<usize, SyncError> {
        self.model.get_from_server().await
    }

    pub fn call_fn(&self, name: &str, args: Value) -> Result<FunctionCall, SyncError> {
        self.model.call_fn(name, args, None)
    }

    /// Call `name` on the server-side counterpart of `item`.
    pub fn call_fn_on(&self, item: &ViewItem, name: &str, args: Value) -> Result<FunctionCall, SyncError> {
        self.model.call_fn(name, args, item.rt_id)
    }

    pub fn get(&self, uid: u64) -> Option<&ViewItem> {
        self.items.iter().find(|item| item.uid == uid)
    }

    pub fn get_by_rt_id(&self, rt_id: u64) -> Option<&ViewItem> {
        self.position_by_rt_id(rt_id).and_then(|index| self.items.get(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ViewItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn position_by_rt_id(&self, rt_id: u64) -> Option<usize> {
        self.items.iter().position(|item| item.rt_id == Some(rt_id))
    }

    fn apply(&mut self, record: &Record) -> bool {
        if record.is_action(&Action::Function) {
            return false;
        }
        let Some(rt_id) = record.meta.rt_id else {
            return false;
        };

        let position = self.position_by_rt_id(rt_id);
        if record.meta.deleted || record.is_action(&Action::DeletePermanently) {
            return match position {
                Some(index) => {
                    self.items.remove(index);
                    true
                },
                None => false,
            };
        }

        let data = (self.map_down)(record);
        match position.and_then(|index| self.items.get_mut(index)) {
            Some(item) => {
                item.data = data;
                item.version += 1;
            },
            None => {
                self.items.push(ViewItem { uid: next_uid(), rt_id: Some(rt_id), version: 0, data });
            },
        }
        true
    }

    /// Reload from the registry, keeping uids and unsaved items.
    fn rebuild(&mut self) {
        let mut previous = std::mem::take(&mut self.items);
        for record in self.model.items() {
            if record.meta.deleted {
                continue;
            }
            let data = (self.map_down)(&record);
            let item = match previous.iter().position(|item| item.rt_id == record.meta.rt_id) {
                Some(index) => {
                    let mut item = previous.swap_remove(index);
                    item.data = data;
                    item.version += 1;
                    item
                },
                None => ViewItem { uid: next_uid(), rt_id: record.meta.rt_id, version: 0, data },
            };
            self.items.push(item);
        }
        self.items.extend(previous.into_iter().filter(|item| item.rt_id.is_none()));
    }
}

impl<'a> IntoIterator for &'a ViewCollection {
    type Item = &'a ViewItem;
    type IntoIter = std::slice::Iter<'a, ViewItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Debug for ViewCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCollection").field("items", &self.items).finish_non_exhaustive()
    }
}
