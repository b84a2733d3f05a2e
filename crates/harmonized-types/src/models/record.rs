//! Records and their identities.
//!
//! A [`Record`] is one transition of one logical entity: its `data` plus a
//! [`Meta`] block carrying whichever ids are known so far. The same entity is
//! seen as a remote item, a stored item and an in-memory record; the shaping
//! helpers here convert between those forms using the configured [`KeyNames`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::Action;

/// Record payload.
pub type Data = Map<String, Value>;

/// Data field holding a function call's name.
pub const FN_NAME_FIELD: &str = "fnName";
/// Data field holding a function call's arguments.
pub const FN_ARGS_FIELD: &str = "fnArgs";
/// Data field receiving a function call's return payload.
pub const FN_RETURN_FIELD: &str = "fnReturn";

/// Identifier assigned by a store: backends use integers, servers may use either.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Str(String),
}

impl RecordKey {
    /// Read a key from a JSON value. Null, booleans, floats and containers are not keys.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for RecordKey {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Names of the id fields inside stored and remote items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNames {
    /// Field carrying the remote id (default `"id"`)
    #[serde(default = "default_server_key")]
    pub server_key: String,
    /// Field carrying the local store id (default `"_id"`)
    #[serde(default = "default_store_key")]
    pub store_key: String,
}

fn default_server_key() -> String {
    "id".to_string()
}

fn default_store_key() -> String {
    "_id".to_string()
}

impl Default for KeyNames {
    fn default() -> Self {
        Self { server_key: default_server_key(), store_key: default_store_key() }
    }
}

/// Identity and routing metadata of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Runtime id, assigned by the router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rt_id: Option<u64>,
    /// Id assigned by the local store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<RecordKey>,
    /// Id assigned by the remote store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<RecordKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Correlates a function call with its result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<u64>,
    /// Pending or confirmed deletion
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// One record transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub meta: Meta,
}

impl Record {
    pub fn new(data: Data) -> Self {
        Self { data, meta: Meta::default() }
    }

    /// Build from a JSON object. Non-object values yield an empty payload.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(data) => Self::new(data),
            _ => Self::default(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.meta.action = Some(action);
        self
    }

    pub fn with_rt_id(mut self, rt_id: u64) -> Self {
        self.meta.rt_id = Some(rt_id);
        self
    }

    pub fn with_store_id(mut self, key: impl Into<RecordKey>) -> Self {
        self.meta.store_id = Some(key.into());
        self
    }

    pub fn with_server_id(mut self, key: impl Into<RecordKey>) -> Self {
        self.meta.server_id = Some(key.into());
        self
    }

    /// A `function` record invoking `name` with `args`.
    pub fn function_call(name: &str, args: Value, transaction_id: u64) -> Self {
        let mut data = Data::new();
        data.insert(FN_NAME_FIELD.to_string(), Value::String(name.to_string()));
        data.insert(FN_ARGS_FIELD.to_string(), args);
        let mut record = Self::new(data).with_action(Action::Function);
        record.meta.transaction_id = Some(transaction_id);
        record
    }

    pub fn action(&self) -> Option<&Action> {
        self.meta.action.as_ref()
    }

    pub fn is_action(&self, action: &Action) -> bool {
        self.meta.action.as_ref() == Some(action)
    }

    pub fn fn_name(&self) -> Option<&str> {
        self.data.get(FN_NAME_FIELD).and_then(Value::as_str)
    }

    pub fn fn_args(&self) -> Value {
        self.data.get(FN_ARGS_FIELD).cloned().unwrap_or(Value::Null)
    }

    pub fn fn_return(&self) -> Option<&Value> {
        self.data.get(FN_RETURN_FIELD)
    }

    /// Record from an item returned by the remote store. The remote id field is
    /// lifted into `meta.server_id` and removed from the payload.
    pub fn from_remote_item(item: Value, keys: &KeyNames) -> Self {
        let mut record = Self::from_value(item);
        if let Some(value) = record.data.remove(&keys.server_key) {
            record.meta.server_id = RecordKey::from_value(&value);
        }
        record
    }

    /// Record from an item read out of the local store.
    pub fn from_store_item(mut item: Data, keys: &KeyNames) -> Self {
        let store_id = item.remove(&keys.store_key).as_ref().and_then(RecordKey::from_value);
        let server_id = item.remove(&keys.server_key).as_ref().and_then(RecordKey::from_value);
        let mut record = Self::new(item);
        record.meta.store_id = store_id;
        record.meta.server_id = server_id;
        record
    }

    /// Payload sent to the remote store: data plus the remote id when known.
    /// The local store id is never included.
    pub fn to_remote_item(&self, keys: &KeyNames) -> Data {
        let mut item = self.data.clone();
        item.remove(&keys.store_key);
        if let Some(server_id) = &self.meta.server_id {
            item.insert(keys.server_key.clone(), server_id.to_value());
        }
        item
    }

    /// Item written to the local store: data plus whichever of the two ids are known.
    pub fn to_store_item(&self, keys: &KeyNames) -> Data {
        let mut item = self.data.clone();
        if let Some(store_id) = &self.meta.store_id {
            item.insert(keys.store_key.clone(), store_id.to_value());
        }
        if let Some(server_id) = &self.meta.server_id {
            item.insert(keys.server_key.clone(), server_id.to_value());
        }
        item
    }
}
