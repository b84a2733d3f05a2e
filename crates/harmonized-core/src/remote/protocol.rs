//! Protocol adapters: how a remote channel talks to the server.

use async_trait::async_trait;
use harmonized_types::{
    Action, HttpTransport, KeyNames, ModelOptions, Protocol, Record, RemoteOptions,
    SocketTransport, SyncError, FN_RETURN_FIELD,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::hooks::RemoteHooks;
use super::http::HttpAdapter;
use super::socket::SocketAdapter;

/// Everything an adapter needs to know about its model.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Full resource URL, ending in `/`
    pub url: String,
    pub route: String,
    pub keys: KeyNames,
    pub options: RemoteOptions,
    pub hooks: RemoteHooks,
}

impl RemoteConfig {
    pub fn new(options: &ModelOptions, hooks: RemoteHooks) -> Self {
        Self {
            url: options.url(),
            route: options.route.trim_matches('/').to_string(),
            keys: options.keys.clone(),
            options: options.server_options.clone(),
            hooks,
        }
    }
}

/// Transports the host makes available. An adapter can only be built for a
/// protocol whose transport is present.
#[derive(Clone, Default)]
pub struct Transports {
    pub http: Option<Arc<dyn HttpTransport>>,
    pub socket: Option<Arc<dyn SocketTransport>>,
}

impl Transports {
    pub fn with_http(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    pub fn with_socket(mut self, transport: Arc<dyn SocketTransport>) -> Self {
        self.socket = Some(transport);
        self
    }
}

/// Result of one fetch.
#[derive(Debug, Default)]
pub struct FetchResult {
    /// `save` records, one per returned item
    pub records: Vec<Record>,
    /// New watermark, when the response provided one
    pub last_modified: Option<i64>,
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn connect(&self) -> Result<(), SyncError>;

    async fn disconnect(&self) -> Result<(), SyncError>;

    /// Read every item, conditioned on `last_modified` when configured.
    async fn fetch(&self, last_modified: i64) -> Result<FetchResult, SyncError>;

    /// Deliver one record. `Ok(None)` means there was nothing to send.
    async fn push(&self, record: Record) -> Result<Option<Record>, SyncError>;
}

pub(crate) fn build_adapter(
    protocol: Protocol,
    config: &Arc<RemoteConfig>,
    transports: &Transports,
    downstream: &mpsc::UnboundedSender<Record>,
) -> Result<Arc<dyn ProtocolAdapter>, SyncError> {
    let unavailable = || SyncError::ProtocolUnavailable { protocol: protocol.to_string() };
    Ok(match protocol {
        Protocol::Http => {
            let transport = transports.http.clone().ok_or_else(unavailable)?;
            Arc::new(HttpAdapter::new(Arc::clone(config), transport))
        },
        Protocol::WebSocket => {
            let transport = transports.socket.clone().ok_or_else(unavailable)?;
            Arc::new(SocketAdapter::new(Arc::clone(config), transport, downstream.clone()))
        },
    })
}

/// Whether a record has to reach the server at all.
pub(crate) fn needs_push(record: &Record) -> bool {
    match record.action() {
        Some(Action::Save | Action::Function) => true,
        Some(Action::Delete | Action::DeletePermanently) => record.meta.server_id.is_some(),
        _ => false,
    }
}

/// Fetched items as `save` records.
pub(crate) fn records_from_items(config: &RemoteConfig, mut items: Vec<Value>) -> Vec<Record> {
    if let Some(hook) = &config.hooks.post_fetch {
        hook(&mut items);
    }
    items
        .into_iter()
        .map(|item| Record::from_remote_item(item, &config.keys).with_action(Action::Save))
        .collect()
}

/// The server's answer list, tolerating a bare object or an empty body.
pub(crate) fn items_of(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Apply a successful push answer to the pushed record.
pub(crate) fn confirm_push(config: &RemoteConfig, mut record: Record, response: &Value) -> Record {
    let returned = Record::from_remote_item(response.clone(), &config.keys);

    match record.meta.action.clone() {
        Some(Action::Save) => {
            if let Some(server_id) = returned.meta.server_id {
                record.meta.server_id = Some(server_id);
            }
            if config.options.use_server_data_on_push && response.is_object() {
                record.data = returned.data;
            }
        },
        Some(Action::Delete | Action::DeletePermanently) => {
            record.meta.action = Some(Action::DeletePermanently);
            record.meta.deleted = true;
        },
        Some(Action::Function) => {
            let value = if response.is_object() {
                Value::Object(returned.data)
            } else {
                response.clone()
            };
            record.data.insert(FN_RETURN_FIELD.to_string(), value);
            if let Some(hook) = &config.hooks.function_return {
                record = hook(record, response);
            }
        },
        _ => {},
    }

    if let Some(hook) = &config.hooks.post_push {
        hook(response, &mut record);
    }
    record
}
