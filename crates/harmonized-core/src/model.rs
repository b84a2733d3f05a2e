//! Model facade: one named model wired from schema to router.
//!
//! A [`Model`] owns its storage channel (when a backend is available), its
//! remote channel and the router task joining them. Build it with
//! [`Model::builder`] inside a tokio runtime, then call [`Model::start`].

use harmonized_types::{
    Action, ModelOptions, ModelSchema, Protocol, Record, SyncError, SyncErrorEvent,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::context::SyncContext;
use crate::remote::{RemoteChannel, RemoteConfig, RemoteHooks, Transports};
use crate::router::{RemoteLink, RouterHandle, StorageLink, SyncRouter};
use crate::storage::{BackendSelector, Connection, MetadataStore, StorageChannel};
use crate::view::{FunctionCall, ViewCollection};

/// Storage metadata key holding the fetch watermark.
pub const LAST_MODIFIED_KEY: &str = "lastModified";

/// Buffer of a model's error stream.
pub const ERROR_CAPACITY: usize = 256;

enum StorageSource {
    Global,
    Shared { connection: Arc<Connection>, metadata: Arc<dyn MetadataStore> },
    Disabled,
}

pub struct ModelBuilder<'a> {
    name: String,
    schema: &'a ModelSchema,
    overrides: Option<Value>,
    ctx: Option<SyncContext>,
    transports: Transports,
    hooks: RemoteHooks,
    storage: StorageSource,
}

impl<'a> ModelBuilder<'a> {
    /// Deep-merged over the schema entry before it is resolved.
    pub fn overrides(mut self, overrides: Value) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn context(mut self, ctx: SyncContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn transports(mut self, transports: Transports) -> Self {
        self.transports = transports;
        self
    }

    pub fn hooks(mut self, hooks: RemoteHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use an already opened (or openable) shared connection.
    pub fn storage(mut self, connection: Arc<Connection>, metadata: Arc<dyn MetadataStore>) -> Self {
        self.storage = StorageSource::Shared { connection, metadata };
        self
    }

    /// Take storage from `selector` instead of the process-wide one.
    pub fn selector(mut self, selector: &BackendSelector) -> Self {
        self.storage = match selector.connection() {
            Some(connection) => StorageSource::Shared { connection, metadata: selector.metadata_store() },
            None => StorageSource::Disabled,
        };
        self
    }

    /// Remote only.
    pub fn without_storage(mut self) -> Self {
        self.storage = StorageSource::Disabled;
        self
    }

    pub fn build(self) -> Result<Model, SyncError> {
        let options = self.schema.resolve(&self.name, self.overrides.as_ref())?;
        let ctx = self.ctx.unwrap_or_default();
        let (errors, _) = broadcast::channel(ERROR_CAPACITY);

        let store_name = options.store_name().to_string();
        let mut storage = match self.storage {
            StorageSource::Global => BackendSelector::global().create_storage_handler(
                &store_name,
                options.keys.clone(),
                errors.clone(),
            ),
            StorageSource::Shared { connection, metadata } => Some(StorageChannel::new(
                &store_name,
                options.keys.clone(),
                connection,
                metadata,
                errors.clone(),
            )?),
            StorageSource::Disabled => None,
        };

        let config = RemoteConfig::new(&options, self.hooks);
        let mut remote = RemoteChannel::new(config, self.transports, &ctx, errors.clone())?;
        if let Some(watermark) = storage
            .as_ref()
            .and_then(|channel| channel.get_metadata().get(LAST_MODIFIED_KEY).and_then(Value::as_i64))
        {
            remote.set_last_modified(watermark);
        }

        let storage_link = storage.as_mut().and_then(|channel| {
            let downstream = channel.take_downstream()?;
            Some(StorageLink { upstream: channel.upstream(), downstream })
        });
        let Some(remote_downstream) = remote.take_downstream() else {
            return Err(SyncError::Disconnected);
        };
        let remote_link = RemoteLink { upstream: remote.upstream(), downstream: remote_downstream };
        let (router, router_task) = SyncRouter::new(storage_link, remote_link, errors).spawn();

        tracing::info!(
            "📦 Model {} ready: {} (storage: {})",
            self.name,
            remote.url(),
            storage.as_ref().map_or("none", |channel| channel.connection().backend().name())
        );

        Ok(Model { name: self.name, options, ctx, router, storage, remote, router_task })
    }
}

pub struct Model {
    name: String,
    options: ModelOptions,
    ctx: SyncContext,
    router: RouterHandle,
    storage: Option<StorageChannel>,
    remote: RemoteChannel,
    router_task: JoinHandle<()>,
}

impl Model {
    /// Builder for the schema entry `name`. Uses the process-wide backend
    /// selector and a fresh context unless told otherwise.
    pub fn builder<'a>(name: &str, schema: &'a ModelSchema) -> ModelBuilder<'a> {
        ModelBuilder {
            name: name.to_string(),
            schema,
            overrides: None,
            ctx: None,
            transports: Transports::default(),
            hooks: RemoteHooks::default(),
            storage: StorageSource::Global,
        }
    }

    /// Open local storage, load it into the router, then connect the remote
    /// side. Resolves with the number of records loaded.
    pub async fn start(&self) -> Result<usize, SyncError> {
        let mut loaded = 0;
        if let Some(storage) = &self.storage {
            storage.connect().await?;
            loaded = storage.load_all().await?;
            self.router.settled().await;
            tracing::info!("💾 Loaded {} {} record(s) from local storage", loaded, self.name);
        }
        self.remote.connect().await?;
        Ok(loaded)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn url(&self) -> &str {
        self.remote.url()
    }

    /// The application-side entry into the router.
    pub fn upstream(&self) -> RouterHandle {
        self.router.clone()
    }

    pub fn get_item(&self, rt_id: u64) -> Option<Record> {
        self.router.get_item(rt_id)
    }

    pub fn get_items<R>(&self, f: impl FnOnce(&[Record]) -> R) -> R {
        self.router.get_items(f)
    }

    pub fn items(&self) -> Vec<Record> {
        self.router.items()
    }

    pub fn send(&self, record: Record) -> Result<Record, SyncError> {
        self.router.send(record)
    }

    pub fn save(&self, record: Record) -> Result<Record, SyncError> {
        self.router.send(record.with_action(Action::Save))
    }

    /// Delete the record `rt_id`. `None` if no such record exists.
    pub fn delete(&self, rt_id: u64) -> Result<Option<Record>, SyncError> {
        if self.router.get_item(rt_id).is_none() {
            return Ok(None);
        }
        let record = Record::default().with_rt_id(rt_id).with_action(Action::Delete);
        self.router.send(record).map(Some)
    }

    /// Call the server procedure `name`, addressed at the record `rt_id` when given.
    pub fn call_fn(&self, name: &str, args: Value, rt_id: Option<u64>) -> Result<FunctionCall, SyncError> {
        let transaction_id = self.ctx.next_transaction_id();
        let call = FunctionCall::new(transaction_id, self.router.clone());

        let mut record = Record::function_call(name, args, transaction_id);
        record.meta.rt_id = rt_id;
        self.router.send(record)?;
        Ok(call)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.router.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<SyncErrorEvent> {
        self.router.subscribe_errors()
    }

    /// Fetch from the server and persist the new watermark.
    pub async fn get_from_server(&self) -> Result<usize, SyncError> {
        let before = self.remote.last_modified();
        let count = self.remote.fetch().await?;
        let after = self.remote.last_modified();

        if after != before {
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.set_metadata(LAST_MODIFIED_KEY, Value::from(after)) {
                    tracing::warn!("Failed to persist watermark for {}: {}", self.name, e);
                }
            }
        }
        Ok(count)
    }

    pub async fn push_all(&self) -> usize {
        self.remote.push_all().await
    }

    pub async fn set_protocol(&self, protocol: Protocol) -> Result<(), SyncError> {
        self.remote.set_protocol(protocol).await
    }

    pub fn unpushed_len(&self) -> usize {
        self.remote.unpushed_len()
    }

    pub fn storage(&self) -> Option<&StorageChannel> {
        self.storage.as_ref()
    }

    pub fn remote(&self) -> &RemoteChannel {
        &self.remote
    }

    /// A presentation view over this model.
    pub fn view(self: &Arc<Self>) -> ViewCollection {
        ViewCollection::new(Arc::clone(self))
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        self.router_task.abort();
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("url", &self.url())
            .field("records", &self.router.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, MemoryMetadataStore, StorageBackend};
    use crate::testing::{ScriptedHttp, FIRST_SERVER_ID};
    use harmonized_types::{HttpMethod, HttpResponse, KeyNames, RecordKey};
    use serde_json::json;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn schema() -> ModelSchema {
        ModelSchema::from_json_str(
            r#"{"users": {"base_url": "http://api.test", "route": "users",
                "server_options": {"send_modified_since": true}}}"#,
        )
        .unwrap()
    }

    struct Fixture {
        model: Model,
        http: Arc<ScriptedHttp>,
        backend: Arc<MemoryBackend>,
    }

    fn build(backend: Arc<MemoryBackend>, metadata: Arc<MemoryMetadataStore>, ctx: SyncContext) -> Fixture {
        let http = Arc::new(ScriptedHttp::new());
        let hooks = RemoteHooks::default()
            .with_last_modified(|response| response.header("last-modified")?.parse().ok());
        let model = Model::builder("users", &schema())
            .context(ctx)
            .transports(Transports::default().with_http(http.clone()))
            .hooks(hooks)
            .storage(Connection::new(backend.clone()), metadata.clone())
            .build()
            .unwrap();
        Fixture { model, http, backend }
    }

    fn fixture() -> Fixture {
        build(Arc::new(MemoryBackend::new()), Arc::new(MemoryMetadataStore::new()), SyncContext::default())
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_save_reaches_both_stores() {
        let f = fixture();
        f.model.start().await.unwrap();
        let saved = f.model.save(Record::from_value(json!({"name": "A"}))).unwrap();
        let rt_id = saved.meta.rt_id.unwrap();

        eventually(|| {
            let item = f.model.get_item(rt_id).unwrap();
            item.meta.store_id.is_some() && item.meta.server_id.is_some()
        })
        .await;

        let item = f.model.get_item(rt_id).unwrap();
        assert_eq!(item.meta.server_id, Some(RecordKey::Int(FIRST_SERVER_ID)));
        // The server id is patched onto the stored copy
        let key = item.meta.store_id.clone().unwrap();
        let keys = KeyNames::default();
        tokio::time::timeout(WAIT, async {
            loop {
                let stored = f.backend.get("users", &keys.store_key, &key).await.unwrap().unwrap();
                if stored.get("id") == Some(&json!(FIRST_SERVER_ID)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.http.request_count(), 1);
    }

    #[tokio::test]
    async fn test_start_loads_local_records_first() {
        let backend = Arc::new(MemoryBackend::new());
        backend.open().await.unwrap();
        let keys = KeyNames::default();
        let mut stored = json!({"name": "local", "id": 7}).as_object().cloned().unwrap();
        backend.put("users", &keys.store_key, stored.clone()).await.unwrap();
        stored.insert("name".into(), json!("unpushed"));
        stored.remove("id");
        backend.put("users", &keys.store_key, stored).await.unwrap();

        let f = build(backend, Arc::new(MemoryMetadataStore::new()), SyncContext::default());
        assert_eq!(f.model.start().await.unwrap(), 2);
        assert_eq!(f.model.items().len(), 2);
        assert!(f.model.items()[0].meta.server_id.is_some());

        // Only the item the server never saw is pushed
        eventually(|| f.http.request_count() == 1).await;
        let request = &f.http.requests()[0];
        assert_eq!(request.body, Some(json!({"name": "unpushed"})));
    }

    #[tokio::test]
    async fn test_watermark_persisted_and_seeded() {
        let backend = Arc::new(MemoryBackend::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let f = build(backend.clone(), metadata.clone(), SyncContext::default());
        f.model.start().await.unwrap();

        let mut response = HttpResponse::ok(json!([{"id": 1, "name": "remote"}]));
        response.headers.insert("last-modified".into(), "1234".into());
        f.http.respond(Ok(response));
        assert_eq!(f.model.get_from_server().await.unwrap(), 1);
        assert_eq!(f.model.storage().unwrap().get_metadata()[LAST_MODIFIED_KEY], json!(1234));
        drop(f);

        let again = build(backend, metadata, SyncContext::default());
        assert_eq!(again.model.remote().last_modified(), 1234);
        again.model.get_from_server().await.unwrap();
        assert_eq!(again.http.requests()[0].headers["If-Modified-Since"], "1234");
    }

    #[tokio::test]
    async fn test_offline_saves_flush_on_reconnect() {
        let ctx = SyncContext::new(false);
        let f = build(Arc::new(MemoryBackend::new()), Arc::new(MemoryMetadataStore::new()), ctx.clone());
        f.model.start().await.unwrap();

        f.model.save(Record::from_value(json!({"name": "A"}))).unwrap();
        f.model.save(Record::from_value(json!({"name": "B"}))).unwrap();
        eventually(|| f.model.unpushed_len() == 2).await;
        assert_eq!(f.http.request_count(), 0);

        ctx.set_online(true);
        eventually(|| f.model.items().iter().all(|item| item.meta.server_id.is_some())).await;
        let names: Vec<_> = f.http.requests().iter().map(|r| r.body.clone().unwrap()["name"].clone()).collect();
        assert_eq!(names, vec![json!("A"), json!("B")]);
        assert_eq!(f.model.unpushed_len(), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let f = fixture();
        f.model.start().await.unwrap();
        let rt_id = f.model.save(Record::from_value(json!({"name": "A"}))).unwrap().meta.rt_id.unwrap();
        eventually(|| {
            f.model.get_item(rt_id).is_some_and(|item| item.meta.server_id.is_some() && item.meta.store_id.is_some())
        })
        .await;

        f.model.delete(rt_id).unwrap().unwrap();
        eventually(|| f.model.get_item(rt_id).is_none()).await;
        eventually(|| f.backend.is_empty("users")).await;
        assert!(f.model.delete(rt_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrite_before_confirmations_keeps_one_copy_each_side() {
        let f = fixture();
        f.model.start().await.unwrap();
        let saved = f.model.save(Record::from_value(json!({"name": "A"}))).unwrap();
        let rt_id = saved.meta.rt_id.unwrap();
        f.model.save(Record::from_value(json!({"name": "A2"})).with_rt_id(rt_id)).unwrap();

        eventually(|| f.http.request_count() == 2).await;
        f.model.upstream().settled().await;
        let methods: Vec<_> = f.http.requests().iter().map(|r| (r.method, r.url.clone())).collect();
        assert_eq!(
            methods,
            vec![
                (HttpMethod::Post, "http://api.test/users/".to_string()),
                (HttpMethod::Put, format!("http://api.test/users/{FIRST_SERVER_ID}/")),
            ]
        );

        eventually(|| {
            f.model.get_item(rt_id).is_some_and(|item| {
                item.data["name"] == json!("A2") && item.meta.server_id.is_some() && item.meta.store_id.is_some()
            })
        })
        .await;
        f.model.upstream().settled().await;
        assert_eq!(f.backend.len("users"), 1);
        assert_eq!(f.model.items().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_before_storage_confirmation_clears_storage() {
        let f = fixture();
        f.model.start().await.unwrap();
        let saved = f.model.save(Record::from_value(json!({"name": "A"}))).unwrap();
        let rt_id = saved.meta.rt_id.unwrap();
        f.model.delete(rt_id).unwrap().unwrap();

        eventually(|| f.model.get_item(rt_id).is_none()).await;
        f.model.upstream().settled().await;
        assert!(f.backend.is_empty("users"));
    }

    #[tokio::test]
    async fn test_function_call_resolves_caller() {
        let f = fixture();
        f.model.start().await.unwrap();
        f.http.respond(Ok(HttpResponse::ok(json!({"sum": 3}))));

        let call = f.model.call_fn("add", json!({"a": 1, "b": 2}), None).unwrap();
        let other = f.model.call_fn("add", json!({"a": 0, "b": 0}), None).unwrap();
        assert_ne!(call.transaction_id(), other.transaction_id());

        let result = tokio::time::timeout(WAIT, call.result()).await.unwrap().unwrap();
        assert_eq!(result, json!({"sum": 3}));
        // Function calls never create records
        assert!(f.model.items().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_is_config_error() {
        let err = Model::builder("posts", &schema()).without_storage().build().err().unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
