//! Remote channel: carries records between the router and the server.
//!
//! ```text
//!   router ──upstream──▶ worker ──▶ ProtocolAdapter (http | socket) ──▶ server
//!                          │  ▲
//!          offline/failed  ▼  │ flush on reconnect
//!                     UnpushedQueue
//!   router ◀─downstream── confirmations, fetched items, server-sent changes
//! ```
//!
//! One worker task delivers records one at a time, so confirmations come back
//! in the order the router sent them. The adapter behind the channel can be
//! swapped at runtime with [`RemoteChannel::set_protocol`].

mod hooks;
mod http;
mod protocol;
mod socket;
mod unpushed;


pub use hooks::{
    FunctionReturnHook, LastModifiedHook, PostFetchHook, PostPushHook, PrePushHook, RemoteHooks,
};
pub use http::{HttpAdapter, IF_MODIFIED_SINCE};
pub use protocol::{FetchResult, ProtocolAdapter, RemoteConfig, Transports};
pub use socket::{SocketAdapter, REQUEST_TIMEOUT};
pub use unpushed::{QueueKey, UnpushedQueue};

use dashmap::DashMap;
use harmonized_types::{Action, Protocol, Record, RecordKey, SyncError, SyncErrorEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::context::SyncContext;
use protocol::{build_adapter, needs_push};

enum Control {
    /// Drain the unpushed queue; report how many records were delivered
    Flush(Option<oneshot::Sender<usize>>),
}

pub struct RemoteChannel {
    inner: Arc<RemoteInner>,
    upstream: mpsc::UnboundedSender<Record>,
    downstream: Option<mpsc::UnboundedReceiver<Record>>,
    tasks: Vec<JoinHandle<()>>,
}

struct RemoteInner {
    config: Arc<RemoteConfig>,
    transports: Transports,
    adapter: RwLock<Arc<dyn ProtocolAdapter>>,
    switch_lock: tokio::sync::Mutex<()>,
    unpushed: Mutex<UnpushedQueue>,
    /// Server ids learned from confirmations, by runtime id
    server_ids: DashMap<u64, RecordKey>,
    connected: watch::Sender<bool>,
    control: mpsc::UnboundedSender<Control>,
    downstream: mpsc::UnboundedSender<Record>,
    errors: broadcast::Sender<SyncErrorEvent>,
    last_modified: AtomicI64,
}

impl RemoteChannel {
    /// Build the channel with the adapter for `config.options.protocol`.
    /// Connection state starts from and then follows `ctx`. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: RemoteConfig,
        transports: Transports,
        ctx: &SyncContext,
        errors: broadcast::Sender<SyncErrorEvent>,
    ) -> Result<Self, SyncError> {
        let config = Arc::new(config);
        let (downstream_tx, downstream) = mpsc::unbounded_channel();
        let (upstream, upstream_rx) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();

        let adapter = build_adapter(config.options.protocol, &config, &transports, &downstream_tx)?;
        let (connected, _) = watch::channel(ctx.is_online());

        let inner = Arc::new(RemoteInner {
            config,
            transports,
            adapter: RwLock::new(adapter),
            switch_lock: tokio::sync::Mutex::new(()),
            unpushed: Mutex::new(UnpushedQueue::new()),
            server_ids: DashMap::new(),
            connected,
            control,
            downstream: downstream_tx,
            errors,
            last_modified: AtomicI64::new(0),
        });

        let worker = tokio::spawn(Arc::clone(&inner).run(upstream_rx, control_rx));

        let watcher_inner = Arc::clone(&inner);
        let mut online = ctx.connection_stream();
        let watcher = tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let value = *online.borrow_and_update();
                watcher_inner.set_connected(value);
            }
        });

        Ok(Self { inner, upstream, downstream: Some(downstream), tasks: vec![worker, watcher] })
    }

    pub fn upstream(&self) -> mpsc::UnboundedSender<Record> {
        self.upstream.clone()
    }

    /// The downstream receiver. Only the first call gets it.
    pub fn take_downstream(&mut self) -> Option<mpsc::UnboundedReceiver<Record>> {
        self.downstream.take()
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.inner.config
    }

    pub fn connection_stream(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Override this channel's connection state. Turning connected flushes
    /// the unpushed queue.
    pub fn set_connection_state(&self, connected: bool) {
        self.inner.set_connected(connected);
    }

    pub async fn connect(&self) -> Result<(), SyncError> {
        let adapter = self.inner.adapter();
        adapter.connect().await.inspect_err(|e| self.inner.emit_error(e.clone(), None))
    }

    pub async fn disconnect(&self) -> Result<(), SyncError> {
        self.inner.adapter().disconnect().await
    }

    /// Read everything changed since the watermark and emit it on downstream.
    pub async fn fetch(&self) -> Result<usize, SyncError> {
        let adapter = self.inner.adapter();
        let since = self.last_modified();
        match adapter.fetch(since).await {
            Ok(result) => {
                if let Some(last_modified) = result.last_modified {
                    self.set_last_modified(last_modified);
                }
                let count = result.records.len();
                for record in result.records {
                    let _ = self.inner.downstream.send(record);
                }
                tracing::info!("📥 Fetched {} item(s) from {}", count, self.url());
                Ok(count)
            },
            Err(err) => {
                tracing::warn!("Fetch from {} failed: {}", self.url(), err);
                self.inner.emit_error(err.clone(), None);
                Err(err)
            },
        }
    }

    /// Deliver every queued record in insertion order. Resolves with the
    /// number delivered.
    pub async fn push_all(&self) -> usize {
        let (done, rx) = oneshot::channel();
        if self.inner.control.send(Control::Flush(Some(done))).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Swap the protocol adapter. No-op when the protocol is unchanged.
    pub async fn set_protocol(&self, protocol: Protocol) -> Result<(), SyncError> {
        let _guard = self.inner.switch_lock.lock().await;
        let current = self.inner.adapter();
        if current.protocol() == protocol {
            return Ok(());
        }

        let next = build_adapter(
            protocol,
            &self.inner.config,
            &self.inner.transports,
            &self.inner.downstream,
        )?;
        if let Err(e) = current.disconnect().await {
            tracing::warn!("Disconnecting {} adapter failed: {}", current.protocol(), e);
        }
        *self.inner.adapter.write() = Arc::clone(&next);
        tracing::info!("🔀 {} switched from {} to {}", self.url(), current.protocol(), protocol);
        next.connect().await
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.adapter().protocol()
    }

    pub fn last_modified(&self) -> i64 {
        self.inner.last_modified.load(Ordering::Relaxed)
    }

    pub fn set_last_modified(&self, value: i64) {
        self.inner.last_modified.store(value, Ordering::Relaxed);
    }

    pub fn unpushed_len(&self) -> usize {
        self.inner.unpushed.lock().len()
    }

    /// Snapshot of the queued records, oldest first.
    pub fn unpushed(&self) -> Vec<Record> {
        self.inner.unpushed.lock().records().cloned().collect()
    }
}

impl Drop for RemoteChannel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl RemoteInner {
    fn adapter(&self) -> Arc<dyn ProtocolAdapter> {
        Arc::clone(&self.adapter.read())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn set_connected(&self, connected: bool) {
        let changed = self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if !changed {
            return;
        }
        tracing::info!("Remote {} connected={}", self.config.url, connected);
        if connected {
            let _ = self.control.send(Control::Flush(None));
        }
    }

    fn emit_error(&self, error: SyncError, record: Option<Record>) {
        let _ = self.errors.send(SyncErrorEvent::new(error, record));
    }

    async fn run(
        self: Arc<Self>,
        mut upstream: mpsc::UnboundedReceiver<Record>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(Control::Flush(done)) = control.recv() => {
                    let delivered = self.flush().await;
                    if let Some(done) = done {
                        let _ = done.send(delivered);
                    }
                },
                record = upstream.recv() => match record {
                    Some(record) => self.push(record).await,
                    None => break,
                },
            }
        }
    }

    async fn push(&self, mut record: Record) {
        // Writes sent before the router learned the server id still address it
        if !record.is_action(&Action::Function) && record.meta.server_id.is_none() {
            record.meta.server_id =
                record.meta.rt_id.and_then(|rt_id| self.server_ids.get(&rt_id).map(|id| id.value().clone()));
        }

        if !needs_push(&record) {
            if record.action().is_some_and(Action::is_delete) {
                // Never reached the server, so only the queued copy goes
                if let Some(key) = QueueKey::of(&record) {
                    self.unpushed.lock().remove(key);
                }
            } else {
                tracing::debug!("Nothing to push for action {:?}", record.action());
            }
            return;
        }

        if !self.is_connected() {
            if record.is_action(&Action::Function) {
                self.emit_error(SyncError::Disconnected, Some(record.clone()));
            }
            self.unpushed.lock().insert(record);
            return;
        }

        self.deliver(record).await;
    }

    /// One push attempt. Failures go back into the queue.
    async fn deliver(&self, record: Record) -> bool {
        let key = QueueKey::of(&record);
        match self.adapter().push(record.clone()).await {
            Ok(Some(confirmed)) => {
                if let Some(key) = key {
                    self.unpushed.lock().remove(key);
                }
                if let Some(rt_id) = confirmed.meta.rt_id {
                    if confirmed.meta.deleted {
                        self.server_ids.remove(&rt_id);
                    } else if let Some(server_id) = &confirmed.meta.server_id {
                        self.server_ids.insert(rt_id, server_id.clone());
                    }
                }
                let _ = self.downstream.send(confirmed);
                true
            },
            Ok(None) => true,
            Err(err) => {
                tracing::warn!("⚠️ Push to {} failed: {}", self.config.url, err);
                if !record.is_action(&Action::Function) || err.is_transient() {
                    self.unpushed.lock().insert(record.clone());
                }
                self.emit_error(err, Some(record));
                false
            },
        }
    }

    async fn flush(&self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let pending = self.unpushed.lock().drain();
        if pending.is_empty() {
            return 0;
        }
        tracing::info!("📤 Pushing {} unpushed record(s) to {}", pending.len(), self.config.url);

        let mut delivered = 0;
        let mut pending = pending.into_iter();
        for record in pending.by_ref() {
            if !self.is_connected() {
                self.unpushed.lock().insert(record);
                break;
            }
            if self.deliver(record).await {
                delivered += 1;
            }
        }
        let mut queue = self.unpushed.lock();
        for record in pending {
            queue.insert(record);
        }
        delivered
    }
}
