//! Request/response protocol adapter.
//!
//! | action                     | request                                   |
//! |----------------------------|-------------------------------------------|
//! | `save`, no server id       | `POST {url}`                              |
//! | `save`, server id          | `PUT {url}{id}/`                          |
//! | `delete*`, server id       | `DELETE {url}{id}/`                       |
//! | `function`                 | `POST {url}[{id}/]{fnName}/`, body fnArgs |

use async_trait::async_trait;
use harmonized_types::{
    Action, HeaderKind, HttpMethod, HttpRequest, HttpTransport, Protocol, Record, SyncError,
};
use serde_json::Value;
use std::sync::Arc;

use super::protocol::{confirm_push, items_of, records_from_items, FetchResult, ProtocolAdapter, RemoteConfig};

/// Header carrying the fetch watermark.
pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

pub struct HttpAdapter {
    config: Arc<RemoteConfig>,
    transport: Arc<dyn HttpTransport>,
}

impl HttpAdapter {
    pub fn new(config: Arc<RemoteConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    fn request(&self, method: HttpMethod, url: String, headers: HeaderKind) -> HttpRequest {
        let mut request = HttpRequest::new(method, url);
        request.headers = self.config.options.http_headers.for_kind(headers);
        request.params = self.config.options.params.clone();
        request
    }

    /// The request for `record`, or `None` if nothing has to be sent.
    fn build_push(&self, record: &Record) -> Option<HttpRequest> {
        let url = &self.config.url;
        let server_id = record.meta.server_id.as_ref();

        let request = match record.action()? {
            Action::Save => {
                let body = Value::Object(record.to_remote_item(&self.config.keys));
                let request = match server_id {
                    None => self.request(HttpMethod::Post, url.clone(), HeaderKind::Post),
                    Some(id) => self.request(HttpMethod::Put, format!("{url}{id}/"), HeaderKind::Put),
                };
                request.with_body(body)
            },
            Action::Delete | Action::DeletePermanently => {
                let id = server_id?;
                self.request(HttpMethod::Delete, format!("{url}{id}/"), HeaderKind::Delete)
            },
            Action::Function => {
                let fn_name = record.fn_name()?;
                let target = match server_id {
                    Some(id) => format!("{url}{id}/{fn_name}/"),
                    None => format!("{url}{fn_name}/"),
                };
                self.request(HttpMethod::Post, target, HeaderKind::Function).with_body(record.fn_args())
            },
            Action::Other(_) => return None,
        };

        Some(match &self.config.hooks.pre_push {
            Some(hook) => hook(request, record),
            None => request,
        })
    }
}

#[async_trait]
impl ProtocolAdapter for HttpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn connect(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn fetch(&self, last_modified: i64) -> Result<FetchResult, SyncError> {
        let mut request = self.request(HttpMethod::Get, self.config.url.clone(), HeaderKind::Get);
        if self.config.options.send_modified_since && last_modified > 0 {
            request.headers.insert(IF_MODIFIED_SINCE.to_string(), last_modified.to_string());
        }

        let response = self.transport.send(request).await?;
        let last_modified = self.config.hooks.get_last_modified.as_ref().and_then(|hook| hook(&response));
        let records = records_from_items(&self.config, items_of(response.data));
        Ok(FetchResult { records, last_modified })
    }

    async fn push(&self, record: Record) -> Result<Option<Record>, SyncError> {
        let Some(request) = self.build_push(&record) else {
            tracing::debug!("Nothing to send for rt={:?}", record.meta.rt_id);
            return Ok(None);
        };
        tracing::debug!("➡️ {} {}", request.method, request.url);
        let response = self.transport.send(request).await?;
        Ok(Some(confirm_push(&self.config, record, &response.data)))
    }
}
