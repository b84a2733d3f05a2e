//! Persistent-connection transport.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::models::RecordKey;

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Client asks for all items of a route
    Fetch,
    /// Client creates an item
    Create,
    /// Client updates an item
    Update,
    /// Client removes an item
    Remove,
    /// Client invokes a remote procedure
    Function,
    /// Server answers a client frame, matched by `ref`
    Reply,
    /// Server pushes a created or updated item
    Change,
    /// Server pushes a removal
    Removed,
}

/// One JSON frame on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketFrame {
    pub kind: FrameKind,
    /// Correlation id; a reply carries the `ref` of the frame it answers
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Remote id the frame addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fn_name: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Reply status, HTTP-style
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SocketFrame {
    pub fn new(kind: FrameKind, route: &str) -> Self {
        Self {
            kind,
            reference: None,
            route: Some(route.to_string()),
            id: None,
            fn_name: None,
            data: Value::Null,
            status: None,
            error: None,
        }
    }

    /// Reply to `reference` carrying `data`.
    pub fn reply(reference: u64, data: Value) -> Self {
        Self {
            kind: FrameKind::Reply,
            reference: Some(reference),
            route: None,
            id: None,
            fn_name: None,
            data,
            status: Some(200),
            error: None,
        }
    }

    /// Turn a reply into a result: an error text or a status >= 400 fails.
    pub fn into_result(self) -> Result<Value, TransportError> {
        match (self.status, self.error) {
            (Some(status), error) if status >= 400 => Err(TransportError::Status {
                status,
                message: error.unwrap_or_default(),
            }),
            (_, Some(message)) => Err(TransportError::Status { status: 500, message }),
            _ => Ok(self.data),
        }
    }
}

/// A socket to the server. `connect` yields the inbound frame stream, which
/// ends when the connection drops.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<BoxStream<'static, SocketFrame>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    async fn send(&self, frame: SocketFrame) -> Result<(), TransportError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_format() {
        let mut frame = SocketFrame::new(FrameKind::Update, "users");
        frame.reference = Some(4);
        frame.id = Some(RecordKey::Int(9));
        frame.data = json!({"name": "A"});
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            json!({"kind": "update", "ref": 4, "route": "users", "id": 9, "data": {"name": "A"}})
        );
    }

    #[test]
    fn test_reply_into_result() {
        assert_eq!(SocketFrame::reply(1, json!([1])).into_result().unwrap(), json!([1]));

        let mut failed = SocketFrame::reply(1, Value::Null);
        failed.status = Some(404);
        failed.error = Some("missing".to_string());
        let err = failed.into_result().unwrap_err();
        assert_eq!(err.status(), Some(404));

        let mut failed = SocketFrame::reply(1, Value::Null);
        failed.error = Some("boom".to_string());
        assert_eq!(failed.into_result().unwrap_err().status(), Some(500));
    }
}
