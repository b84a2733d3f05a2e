//! Remote channel options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::enums::{HeaderKind, Protocol};

/// Per-action header sets. `all` is applied on top of the action's own set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeaders {
    #[serde(default)]
    pub get: BTreeMap<String, String>,
    #[serde(default)]
    pub post: BTreeMap<String, String>,
    #[serde(default)]
    pub put: BTreeMap<String, String>,
    #[serde(default)]
    pub delete: BTreeMap<String, String>,
    #[serde(default)]
    pub function: BTreeMap<String, String>,
    #[serde(default)]
    pub all: BTreeMap<String, String>,
}

impl HttpHeaders {
    /// Headers for one request: the action's set, then `all` (which wins on clashes).
    pub fn for_kind(&self, kind: HeaderKind) -> BTreeMap<String, String> {
        let base = match kind {
            HeaderKind::Get => &self.get,
            HeaderKind::Post => &self.post,
            HeaderKind::Put => &self.put,
            HeaderKind::Delete => &self.delete,
            HeaderKind::Function => &self.function,
        };
        let mut headers = base.clone();
        headers.extend(self.all.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }
}

/// Options of a model's remote channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOptions {
    /// Transport used at construction
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub http_headers: HttpHeaders,
    /// Query parameters added to every request
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Send `If-Modified-Since` with the stored watermark on fetch
    #[serde(default)]
    pub send_modified_since: bool,
    /// Replace record data with the server's answer after a save
    #[serde(default)]
    pub use_server_data_on_push: bool,
}
