//! Storage channel: routes records to and from the local store.
//!
//! ```text
//!  upstream ──► [pause gate] ──► save  ──► backend.put ───┐
//!                   ▲        └─► delete ─► backend.remove ─┴─► downstream
//!                   │
//!         connection state (Connected opens the gate)
//! ```
//!
//! Ops queue in arrival order while the connection is down and are applied
//! oldest first once it comes up. Unknown actions are dropped.

mod backend;
mod connection;
mod memory;
mod metadata;
mod selector;
mod sqlite;


pub use backend::StorageBackend;
pub use connection::{Connection, ConnectionState};
pub use memory::MemoryBackend;
pub use metadata::{
    metadata_key, JsonFileMetadataStore, MemoryMetadataStore, MetadataStore,
    DEFAULT_METADATA_LIMIT, METADATA_KEY_PREFIX,
};
pub use selector::{
    BackendProbe, BackendSelector, MemoryProbe, SqliteProbe, DATABASE_FILE, METADATA_DIR,
};
pub use sqlite::SqliteBackend;

use harmonized_types::{
    Action, Data, KeyNames, Record, RecordKey, StorageError, SyncError, SyncErrorEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Work item of a storage channel.
#[derive(Debug)]
pub enum StorageOp {
    /// Persist (`save`) or remove (`delete`, `deletePermanently`) a record
    Write(Record),
    /// Write a newly learned remote id onto a stored item, without re-emitting it
    AttachServerId { store_id: RecordKey, server_id: RecordKey },
    /// Emit every stored item as a `save` record; reports the count when done
    LoadAll { done: Option<oneshot::Sender<usize>> },
}

/// Sending side of a storage channel.
#[derive(Debug, Clone)]
pub struct StorageUpstream {
    tx: mpsc::UnboundedSender<StorageOp>,
}

impl StorageUpstream {
    /// A detached upstream and the receiver it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StorageOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, record: Record) -> Result<(), SyncError> {
        self.submit(StorageOp::Write(record))
    }

    pub fn attach_server_id(&self, store_id: RecordKey, server_id: RecordKey) -> Result<(), SyncError> {
        self.submit(StorageOp::AttachServerId { store_id, server_id })
    }

    pub fn submit(&self, op: StorageOp) -> Result<(), SyncError> {
        self.tx
            .send(op)
            .map_err(|_| SyncError::Storage { message: "storage channel is closed".to_string() })
    }
}

pub struct StorageChannel {
    store_name: String,
    upstream: StorageUpstream,
    downstream: Option<mpsc::UnboundedReceiver<Record>>,
    connection: Arc<Connection>,
    metadata_store: Arc<dyn MetadataStore>,
    metadata: Mutex<Data>,
    worker: JoinHandle<()>,
}

impl StorageChannel {
    /// Build a channel on a shared connection. Reads the store's metadata once.
    /// Must be called inside a tokio runtime.
    pub fn new(
        store_name: &str,
        keys: KeyNames,
        connection: Arc<Connection>,
        metadata_store: Arc<dyn MetadataStore>,
        errors: broadcast::Sender<SyncErrorEvent>,
    ) -> Result<Self, StorageError> {
        let metadata = metadata_store.read(&metadata_key(store_name))?.unwrap_or_default();
        let (upstream, rx) = StorageUpstream::channel();
        let (downstream_tx, downstream) = mpsc::unbounded_channel();

        let worker = StorageWorker {
            store_name: store_name.to_string(),
            keys,
            connection: Arc::clone(&connection),
            downstream: downstream_tx,
            errors,
            assigned: HashMap::new(),
        };
        let worker = tokio::spawn(worker.run(rx, connection.subscribe()));

        Ok(Self {
            store_name: store_name.to_string(),
            upstream,
            downstream: Some(downstream),
            connection,
            metadata_store,
            metadata: Mutex::new(metadata),
            worker,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn upstream(&self) -> StorageUpstream {
        self.upstream.clone()
    }

    /// The downstream receiver. Only the first call gets it.
    pub fn take_downstream(&mut self) -> Option<mpsc::UnboundedReceiver<Record>> {
        self.downstream.take()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Open the shared connection. Idempotent across channels sharing it.
    pub async fn connect(&self) -> Result<(), StorageError> {
        self.connection.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Emit every stored item on downstream. Resolves with the count once all
    /// items are queued there.
    pub async fn load_all(&self) -> Result<usize, SyncError> {
        let (done, rx) = oneshot::channel();
        self.upstream.submit(StorageOp::LoadAll { done: Some(done) })?;
        rx.await.map_err(|_| SyncError::Storage { message: "load was abandoned".to_string() })
    }

    pub fn get_metadata(&self) -> Data {
        self.metadata.lock().clone()
    }

    /// Set one metadata key and rewrite the whole mapping.
    pub fn set_metadata(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut metadata = self.metadata.lock();
        let mut updated = metadata.clone();
        updated.insert(key.to_string(), value);
        self.metadata_store.write(&metadata_key(&self.store_name), &updated)?;
        *metadata = updated;
        Ok(())
    }
}

impl Drop for StorageChannel {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct StorageWorker {
    store_name: String,
    keys: KeyNames,
    connection: Arc<Connection>,
    downstream: mpsc::UnboundedSender<Record>,
    errors: broadcast::Sender<SyncErrorEvent>,
    /// Store ids this worker handed out, by runtime id. Writes sent before the
    /// router saw the first confirmation still land on the same item.
    assigned: HashMap<u64, RecordKey>,
}

impl StorageWorker {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<StorageOp>,
        mut state: watch::Receiver<ConnectionState>,
    ) {
        while let Some(op) = rx.recv().await {
            // Hold the op until the gate opens; later ops stay queued behind it.
            if state.wait_for(|s| *s == ConnectionState::Connected).await.is_err() {
                break;
            }
            self.apply(op).await;
        }
        tracing::debug!("Storage worker for {} stopped", self.store_name);
    }

    async fn apply(&mut self, op: StorageOp) {
        match op {
            StorageOp::Write(record) => self.write(record).await,
            StorageOp::AttachServerId { store_id, server_id } => {
                if let Err(e) = self.attach_server_id(&store_id, server_id).await {
                    tracing::error!("Failed to attach server id to {}#{}: {}", self.store_name, store_id, e);
                    self.report(e, None);
                }
            },
            StorageOp::LoadAll { done } => {
                let count = match self.load_all().await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::error!("Failed to load {}: {}", self.store_name, e);
                        self.report(e, None);
                        0
                    },
                };
                if let Some(done) = done {
                    let _ = done.send(count);
                }
            },
        }
    }

    async fn write(&mut self, mut record: Record) {
        let backend = Arc::clone(self.connection.backend());
        let action = record.meta.action.clone();
        if record.meta.store_id.is_none() {
            record.meta.store_id =
                record.meta.rt_id.and_then(|rt_id| self.assigned.get(&rt_id).cloned());
        }
        let result = match action {
            Some(Action::Save) => {
                let item = record.to_store_item(&self.keys);
                backend.put(&self.store_name, &self.keys.store_key, item).await.map(|key| {
                    if let Some(rt_id) = record.meta.rt_id {
                        self.assigned.insert(rt_id, key.clone());
                    }
                    record.meta.store_id = Some(key);
                })
            },
            Some(Action::Delete | Action::DeletePermanently) => {
                if let Some(rt_id) = record.meta.rt_id {
                    self.assigned.remove(&rt_id);
                }
                match &record.meta.store_id {
                    Some(key) => backend.remove(&self.store_name, key).await,
                    None => Ok(()),
                }
            },
            other => {
                tracing::debug!(
                    "Storage {} ignoring record with action {:?}",
                    self.store_name,
                    other.as_ref().map(Action::as_str)
                );
                return;
            },
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    "💾 {} {} rt={:?} store={:?}",
                    self.store_name,
                    record.action().map(Action::as_str).unwrap_or_default(),
                    record.meta.rt_id,
                    record.meta.store_id
                );
                let _ = self.downstream.send(record);
            },
            Err(e) => {
                tracing::error!("Storage write to {} failed: {}", self.store_name, e);
                self.report(e, Some(record));
            },
        }
    }

    async fn attach_server_id(
        &self,
        store_id: &RecordKey,
        server_id: RecordKey,
    ) -> Result<(), StorageError> {
        let backend = self.connection.backend();
        let Some(mut item) = backend.get(&self.store_name, &self.keys.store_key, store_id).await?
        else {
            tracing::debug!("No stored item {}#{} to attach server id to", self.store_name, store_id);
            return Ok(());
        };
        item.insert(self.keys.server_key.clone(), server_id.to_value());
        backend.put(&self.store_name, &self.keys.store_key, item).await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<usize, StorageError> {
        let items =
            self.connection.backend().get_all(&self.store_name, &self.keys.store_key).await?;
        let count = items.len();
        for item in items {
            let record = Record::from_store_item(item, &self.keys).with_action(Action::Save);
            let _ = self.downstream.send(record);
        }
        tracing::info!("📂 Loaded {} stored item(s) from {}", count, self.store_name);
        Ok(count)
    }

    fn report(&self, err: StorageError, record: Option<Record>) {
        let _ = self.errors.send(SyncErrorEvent::new(err.into(), record));
    }
}
