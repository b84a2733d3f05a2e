//! Synchronization router: one timeline merging app, storage and remote traffic.
//!
//! ```text
//!        app ──send()──┐
//!                      ▼
//!   storage ◀──▶ [ registry + rules ] ◀──▶ remote
//!                      │
//!                      ▼
//!                presentation
//! ```
//!
//! Records written by the app are reconciled inline by [`RouterHandle::send`]
//! and forwarded to both channels. Records coming back from a channel are
//! handled by the router task, storage before remote, and forwarded to the
//! other channel and the presentation stream. Nothing is ever sent back to the
//! channel it came from.
//!
//! A channel record carrying a runtime id answers something the router sent
//! earlier. One without a runtime id is news from that side.


use dashmap::DashMap;
use harmonized_types::{Action, Record, RecordKey, SyncError, SyncErrorEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::registry::{IdentityRegistry, Reconciled};
use crate::storage::StorageUpstream;

/// Buffer of the presentation stream. Slow subscribers that fall further
/// behind see `Lagged` and must resync from the registry.
pub const PRESENTATION_CAPACITY: usize = 1024;

/// Both ends of the storage channel as seen by the router.
pub struct StorageLink {
    pub upstream: StorageUpstream,
    pub downstream: mpsc::UnboundedReceiver<Record>,
}

/// Both ends of the remote channel as seen by the router.
pub struct RemoteLink {
    pub upstream: mpsc::UnboundedSender<Record>,
    pub downstream: mpsc::UnboundedReceiver<Record>,
}

/// Cheap, cloneable entry point into a router.
#[derive(Clone)]
pub struct RouterHandle {
    shared: Arc<RouterShared>,
}

struct RouterShared {
    registry: Mutex<IdentityRegistry>,
    storage: Option<StorageUpstream>,
    remote: mpsc::UnboundedSender<Record>,
    presentation: broadcast::Sender<Record>,
    errors: broadcast::Sender<SyncErrorEvent>,
    settle: mpsc::UnboundedSender<oneshot::Sender<()>>,
    /// Callers waiting for a function result, by transaction id
    calls: DashMap<u64, oneshot::Sender<Record>>,
}

pub struct SyncRouter {
    shared: Arc<RouterShared>,
    storage_downstream: Option<mpsc::UnboundedReceiver<Record>>,
    remote_downstream: mpsc::UnboundedReceiver<Record>,
    settle: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

impl SyncRouter {
    /// A router without local persistence when `storage` is `None`.
    pub fn new(
        storage: Option<StorageLink>,
        remote: RemoteLink,
        errors: broadcast::Sender<SyncErrorEvent>,
    ) -> Self {
        let (presentation, _) = broadcast::channel(PRESENTATION_CAPACITY);
        let (settle_tx, settle) = mpsc::unbounded_channel();
        let (storage_upstream, storage_downstream) = match storage {
            Some(link) => (Some(link.upstream), Some(link.downstream)),
            None => (None, None),
        };
        let shared = Arc::new(RouterShared {
            registry: Mutex::new(IdentityRegistry::new()),
            storage: storage_upstream,
            remote: remote.upstream,
            presentation,
            errors,
            settle: settle_tx,
            calls: DashMap::new(),
        });
        Self { shared, storage_downstream, remote_downstream: remote.downstream, settle }
    }

    pub fn handle(&self) -> RouterHandle {
        RouterHandle { shared: Arc::clone(&self.shared) }
    }

    /// Start the router task.
    pub fn spawn(self) -> (RouterHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Process channel traffic until the remote downstream closes.
    pub async fn run(mut self) {
        let mut storage_open = self.storage_downstream.is_some();
        loop {
            tokio::select! {
                biased;
                record = recv_optional(&mut self.storage_downstream), if storage_open => match record {
                    Some(record) => self.shared.from_storage(record),
                    None => storage_open = false,
                },
                record = self.remote_downstream.recv() => match record {
                    Some(record) => self.shared.from_remote(record),
                    None => break,
                },
                Some(done) = self.settle.recv() => {
                    let _ = done.send(());
                },
            }
        }
        tracing::debug!("Router stopped");
    }
}

async fn recv_optional(rx: &mut Option<mpsc::UnboundedReceiver<Record>>) -> Option<Record> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

impl RouterHandle {
    /// Accept a record from the application. Returns the record as forwarded,
    /// carrying its runtime id.
    ///
    /// A record without an action is a `save`. Function calls skip the
    /// registry and go to the remote channel only.
    pub fn send(&self, mut record: Record) -> Result<Record, SyncError> {
        let action = record.meta.action.clone().unwrap_or(Action::Save);
        record.meta.action = Some(action.clone());

        match action {
            Action::Function => {
                if record.meta.server_id.is_none() {
                    let registry = self.shared.registry.lock();
                    record.meta.server_id = record
                        .meta
                        .rt_id
                        .and_then(|rt_id| registry.get(rt_id))
                        .and_then(|handle| handle.meta.server_id.clone());
                }
                self.shared.send_remote(record.clone())?;
                Ok(record)
            },
            Action::Save | Action::Delete | Action::DeletePermanently => {
                if action == Action::Delete {
                    record.meta.deleted = true;
                }
                let mut registry = self.shared.registry.lock();
                let reconciled = registry.reconcile(&record);
                let rt_id = reconciled.rt_id();
                self.shared.report_conflicts(&reconciled);
                if action == Action::DeletePermanently {
                    registry.remove(rt_id);
                }

                let mut outgoing = reconciled.record;
                outgoing.meta.action = Some(action);
                outgoing.meta.transaction_id = record.meta.transaction_id;
                if let Some(storage) = &self.shared.storage {
                    storage.send(outgoing.clone())?;
                }
                self.shared.send_remote(outgoing.clone())?;
                Ok(outgoing)
            },
            Action::Other(name) => {
                tracing::debug!("Dropping app record with unknown action {}", name);
                Ok(record)
            },
        }
    }

    /// Deliver the result of the function call `transaction_id` to the
    /// returned receiver instead of relying on the presentation stream alone.
    pub fn expect_function_result(&self, transaction_id: u64) -> oneshot::Receiver<Record> {
        let (tx, rx) = oneshot::channel();
        self.shared.calls.insert(transaction_id, tx);
        rx
    }

    /// Stop waiting for a function result.
    pub fn forget_function_result(&self, transaction_id: u64) {
        self.shared.calls.remove(&transaction_id);
    }

    /// Resolves once the router has handled everything the channels had
    /// already emitted when this was called.
    pub async fn settled(&self) {
        let (done, rx) = oneshot::channel();
        if self.shared.settle.send(done).is_ok() {
            let _ = rx.await;
        }
    }

    /// Snapshot of the handle for `rt_id`.
    pub fn get_item(&self, rt_id: u64) -> Option<Record> {
        self.shared.registry.lock().get(rt_id).cloned()
    }

    pub fn get_item_by_server_id(&self, key: &RecordKey) -> Option<Record> {
        self.shared.registry.lock().get_by_server_id(key).cloned()
    }

    pub fn get_item_by_store_id(&self, key: &RecordKey) -> Option<Record> {
        self.shared.registry.lock().get_by_store_id(key).cloned()
    }

    /// Run `f` over every live handle, oldest runtime id first.
    pub fn get_items<R>(&self, f: impl FnOnce(&[Record]) -> R) -> R {
        f(&self.items())
    }

    pub fn items(&self) -> Vec<Record> {
        let registry = self.shared.registry.lock();
        let mut items: Vec<Record> = registry.iter().cloned().collect();
        items.sort_by_key(|record| record.meta.rt_id);
        items
    }

    pub fn len(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.registry.lock().is_empty()
    }

    /// Records reconciled from either channel, plus function results.
    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.shared.presentation.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<SyncErrorEvent> {
        self.shared.errors.subscribe()
    }

    pub fn errors(&self) -> broadcast::Sender<SyncErrorEvent> {
        self.shared.errors.clone()
    }
}

impl RouterShared {
    fn send_remote(&self, record: Record) -> Result<(), SyncError> {
        self.remote.send(record).map_err(|_| SyncError::Disconnected)
    }

    fn present(&self, record: Record) {
        let _ = self.presentation.send(record);
    }

    fn report_conflicts(&self, reconciled: &Reconciled) {
        for conflict in &reconciled.conflicts {
            let event = SyncErrorEvent::new(conflict.clone(), Some(reconciled.record.clone()));
            let _ = self.errors.send(event);
        }
    }

    fn to_storage(&self, record: Record) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.send(record) {
                tracing::warn!("Storage forward failed: {}", e);
            }
        }
    }

    fn attach_server_id(&self, handle: &Record) {
        let (Some(storage), Some(store_id), Some(server_id)) =
            (&self.storage, &handle.meta.store_id, &handle.meta.server_id)
        else {
            return;
        };
        if let Err(e) = storage.attach_server_id(store_id.clone(), server_id.clone()) {
            tracing::warn!("Identity patch for store id {} failed: {}", store_id, e);
        }
    }

    fn from_storage(&self, record: Record) {
        let mut registry = self.registry.lock();
        match record.meta.action.clone() {
            Some(Action::Save) => {
                if let Some(rt_id) = record.meta.rt_id {
                    if registry.get(rt_id).is_none() {
                        tracing::debug!("Storage confirmed removed record rt={}, purging it", rt_id);
                        if record.meta.store_id.is_some() {
                            self.to_storage(purged(record));
                        }
                        return;
                    }
                }
                let known = registry.lookup(&record.meta).is_some();
                let reconciled = registry.reconcile(&record);
                self.report_conflicts(&reconciled);
                let handle = reconciled.record.with_action(Action::Save);

                if !known {
                    if handle.meta.server_id.is_none() && !handle.meta.deleted {
                        let _ = self.send_remote(handle.clone());
                    }
                } else if record.meta.server_id.is_none() {
                    // The remote side confirmed before the local write finished
                    self.attach_server_id(&handle);
                }
                self.present(handle);
            },
            Some(Action::Delete | Action::DeletePermanently) => {
                let Some((rt_id, _)) = registry.lookup(&record.meta) else {
                    tracing::debug!("Storage delete for unknown record {:?}", record.meta.store_id);
                    return;
                };
                let confirmed_remotely = registry.get(rt_id).is_some_and(|h| h.meta.server_id.is_some());
                if record.is_action(&Action::DeletePermanently) || !confirmed_remotely {
                    if let Some(removed) = registry.remove(rt_id) {
                        self.present(purged(removed));
                    }
                } else {
                    registry.mark_deleted(rt_id);
                }
            },
            other => tracing::debug!("Ignoring storage record with action {:?}", other),
        }
    }

    fn from_remote(&self, record: Record) {
        let mut registry = self.registry.lock();
        match record.meta.action.clone() {
            Some(Action::Function) => {
                if let Some((_, caller)) =
                    record.meta.transaction_id.and_then(|id| self.calls.remove(&id))
                {
                    let _ = caller.send(record.clone());
                }
                self.present(record);
            },
            Some(Action::Save) => {
                let confirmation = record.meta.rt_id.is_some();
                if let Some(rt_id) = record.meta.rt_id {
                    if registry.get(rt_id).is_none() {
                        tracing::debug!("Dropping confirmation for removed record rt={}", rt_id);
                        return;
                    }
                }
                let reconciled = registry.reconcile(&record);
                self.report_conflicts(&reconciled);
                let gained_server_id = reconciled.gained_server_id;
                let handle = reconciled.record.with_action(Action::Save);

                if !confirmation {
                    self.to_storage(handle.clone());
                } else if gained_server_id {
                    self.attach_server_id(&handle);
                }
                self.present(handle);
            },
            Some(Action::Delete | Action::DeletePermanently) => {
                let Some((rt_id, _)) = registry.lookup(&record.meta) else {
                    tracing::debug!("Remote delete for unknown record {:?}", record.meta.server_id);
                    return;
                };
                if let Some(removed) = registry.remove(rt_id) {
                    let removed = purged(removed);
                    self.to_storage(removed.clone());
                    self.present(removed);
                }
            },
            other => tracing::debug!("Ignoring remote record with action {:?}", other),
        }
    }
}

fn purged(mut record: Record) -> Record {
    record.meta.action = Some(Action::DeletePermanently);
    record.meta.deleted = true;
    record
}
