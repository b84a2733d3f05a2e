//! Lifecycle hooks of a remote channel.

use harmonized_types::{HttpRequest, HttpResponse, Record};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Sees (and may edit) the raw fetched items before they become records.
pub type PostFetchHook = Arc<dyn Fn(&mut Vec<Value>) + Send + Sync>;
/// Rewrites an HTTP request right before it is sent.
pub type PrePushHook = Arc<dyn Fn(HttpRequest, &Record) -> HttpRequest + Send + Sync>;
/// Runs after a successful push with the server's answer.
pub type PostPushHook = Arc<dyn Fn(&Value, &mut Record) + Send + Sync>;
/// Post-processes a function result record.
pub type FunctionReturnHook = Arc<dyn Fn(Record, &Value) -> Record + Send + Sync>;
/// Extracts the fetch watermark from a response.
pub type LastModifiedHook = Arc<dyn Fn(&HttpResponse) -> Option<i64> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RemoteHooks {
    pub post_fetch: Option<PostFetchHook>,
    pub pre_push: Option<PrePushHook>,
    pub post_push: Option<PostPushHook>,
    pub function_return: Option<FunctionReturnHook>,
    pub get_last_modified: Option<LastModifiedHook>,
}

impl RemoteHooks {
    pub fn with_post_fetch(mut self, hook: impl Fn(&mut Vec<Value>) + Send + Sync + 'static) -> Self {
        self.post_fetch = Some(Arc::new(hook));
        self
    }

    pub fn with_pre_push(
        mut self,
        hook: impl Fn(HttpRequest, &Record) -> HttpRequest + Send + Sync + 'static,
    ) -> Self {
        self.pre_push = Some(Arc::new(hook));
        self
    }

    pub fn with_post_push(mut self, hook: impl Fn(&Value, &mut Record) + Send + Sync + 'static) -> Self {
        self.post_push = Some(Arc::new(hook));
        self
    }

    pub fn with_function_return(
        mut self,
        hook: impl Fn(Record, &Value) -> Record + Send + Sync + 'static,
    ) -> Self {
        self.function_return = Some(Arc::new(hook));
        self
    }

    pub fn with_last_modified(
        mut self,
        hook: impl Fn(&HttpResponse) -> Option<i64> + Send + Sync + 'static,
    ) -> Self {
        self.get_last_modified = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RemoteHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHooks")
            .field("post_fetch", &self.post_fetch.is_some())
            .field("pre_push", &self.pre_push.is_some())
            .field("post_push", &self.post_push.is_some())
            .field("function_return", &self.function_return.is_some())
            .field("get_last_modified", &self.get_last_modified.is_some())
            .finish()
    }
}
