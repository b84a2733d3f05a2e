//! Persistent-connection protocol adapter.
//!
//! Every client frame carries a fresh `ref`; the server's `reply` frame with
//! the same `ref` completes it. Frames the server sends on its own (`change`,
//! `removed`) go straight to the channel's downstream.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use harmonized_types::{
    Action, FrameKind, HttpResponse, Protocol, Record, SocketFrame, SocketTransport, SyncError,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::protocol::{confirm_push, items_of, records_from_items, FetchResult, ProtocolAdapter, RemoteConfig};

/// How long a request waits for its reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingReplies = Arc<DashMap<u64, oneshot::Sender<SocketFrame>>>;

pub struct SocketAdapter {
    config: Arc<RemoteConfig>,
    transport: Arc<dyn SocketTransport>,
    downstream: mpsc::UnboundedSender<Record>,
    pending: PendingReplies,
    next_ref: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SocketAdapter {
    pub fn new(
        config: Arc<RemoteConfig>,
        transport: Arc<dyn SocketTransport>,
        downstream: mpsc::UnboundedSender<Record>,
    ) -> Self {
        Self {
            config,
            transport,
            downstream,
            pending: Arc::new(DashMap::new()),
            next_ref: AtomicU64::new(1),
            reader: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.lock().as_ref().is_some_and(|reader| !reader.is_finished())
    }

    async fn open(&self) -> Result<(), SyncError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_open() {
            return Ok(());
        }
        let stream = self.transport.connect().await?;
        let reader = tokio::spawn(read_frames(
            stream,
            Arc::clone(&self.pending),
            self.downstream.clone(),
            Arc::clone(&self.config),
        ));
        *self.reader.lock() = Some(reader);
        tracing::info!("🔌 Socket connected for /{}", self.config.route);
        Ok(())
    }

    async fn request(&self, mut frame: SocketFrame) -> Result<Value, SyncError> {
        self.open().await?;
        let reference = self.next_ref.fetch_add(1, Ordering::Relaxed);
        frame.reference = Some(reference);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(reference, tx);
        if let Err(e) = self.transport.send(frame).await {
            self.pending.remove(&reference);
            return Err(e.into());
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply.into_result()?),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.pending.remove(&reference);
                Err(TransportError::Timeout { attempts: 1 }.into())
            },
        }
    }

    fn frame(&self, kind: FrameKind) -> SocketFrame {
        SocketFrame::new(kind, &self.config.route)
    }
}

async fn read_frames(
    mut stream: BoxStream<'static, SocketFrame>,
    pending: PendingReplies,
    downstream: mpsc::UnboundedSender<Record>,
    config: Arc<RemoteConfig>,
) {
    while let Some(frame) = stream.next().await {
        match frame.kind {
            FrameKind::Reply => match frame.reference.and_then(|r| pending.remove(&r)) {
                Some((_, waiter)) => {
                    let _ = waiter.send(frame);
                },
                None => tracing::debug!("Dropping reply with unknown ref {:?}", frame.reference),
            },
            FrameKind::Change => {
                let mut record = Record::from_remote_item(frame.data, &config.keys).with_action(Action::Save);
                if frame.id.is_some() {
                    record.meta.server_id = frame.id;
                }
                let _ = downstream.send(record);
            },
            FrameKind::Removed => {
                let mut record = Record::from_remote_item(frame.data, &config.keys);
                if frame.id.is_some() {
                    record.meta.server_id = frame.id;
                }
                if record.meta.server_id.is_none() {
                    tracing::debug!("Ignoring removal frame without id");
                    continue;
                }
                record.meta.action = Some(Action::DeletePermanently);
                record.meta.deleted = true;
                let _ = downstream.send(record);
            },
            other => tracing::debug!("Ignoring client-side frame kind {:?} from server", other),
        }
    }
    // Dropping the senders fails every request still waiting
    pending.clear();
    tracing::warn!("⚠️ Socket stream for /{} closed", config.route);
}

#[async_trait]
impl ProtocolAdapter for SocketAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::WebSocket
    }

    async fn connect(&self) -> Result<(), SyncError> {
        self.open().await
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        let _guard = self.connect_lock.lock().await;
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.pending.clear();
        self.transport.disconnect().await?;
        tracing::info!("Socket disconnected for /{}", self.config.route);
        Ok(())
    }

    async fn fetch(&self, last_modified: i64) -> Result<FetchResult, SyncError> {
        let mut frame = self.frame(FrameKind::Fetch);
        if self.config.options.send_modified_since && last_modified > 0 {
            frame.data = json!({ "since": last_modified });
        }
        let data = self.request(frame).await?;

        let last_modified = self
            .config
            .hooks
            .get_last_modified
            .as_ref()
            .and_then(|hook| hook(&HttpResponse::ok(data.clone())));
        let records = records_from_items(&self.config, items_of(data));
        Ok(FetchResult { records, last_modified })
    }

    async fn push(&self, record: Record) -> Result<Option<Record>, SyncError> {
        let server_id = record.meta.server_id.clone();
        let frame = match record.action() {
            Some(Action::Save) => {
                let kind = if server_id.is_some() { FrameKind::Update } else { FrameKind::Create };
                let mut frame = self.frame(kind);
                frame.id = server_id;
                frame.data = Value::Object(record.to_remote_item(&self.config.keys));
                frame
            },
            Some(Action::Delete | Action::DeletePermanently) => {
                let Some(id) = server_id else {
                    return Ok(None);
                };
                let mut frame = self.frame(FrameKind::Remove);
                frame.id = Some(id);
                frame
            },
            Some(Action::Function) => {
                let Some(fn_name) = record.fn_name() else {
                    return Ok(None);
                };
                let mut frame = self.frame(FrameKind::Function);
                frame.fn_name = Some(fn_name.to_string());
                frame.id = server_id;
                frame.data = record.fn_args();
                frame
            },
            _ => return Ok(None),
        };

        let response = self.request(frame).await?;
        Ok(Some(confirm_push(&self.config, record, &response)))
    }
}

impl Drop for SocketAdapter {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}
