//! In-process transports for exercising the engine without a network.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use harmonized_types::{
    FrameKind, HttpMethod, HttpRequest, HttpResponse, HttpTransport, SocketFrame, SocketTransport,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// First id the echo server hands out.
pub(crate) const FIRST_SERVER_ID: i64 = 1000;

/// Records every request. Answers from a script first, then like a small
/// echo server: `POST` assigns ids from 1000, `PUT` echoes the body,
/// `GET` and `DELETE` return empty bodies.
pub(crate) struct ScriptedHttp {
    pub requests: Mutex<Vec<HttpRequest>>,
    pub fail: AtomicBool,
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    next_id: AtomicI64,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(FIRST_SERVER_ID),
        }
    }

    pub fn respond(&self, response: Result<HttpResponse, TransportError>) {
        self.script.lock().push_back(response);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn echo(&self, request: &HttpRequest) -> HttpResponse {
        let data = match request.method {
            HttpMethod::Get => json!([]),
            HttpMethod::Delete => json!({}),
            HttpMethod::Put => request.body.clone().unwrap_or(Value::Null),
            HttpMethod::Post => {
                let mut body = request.body.clone().unwrap_or_else(|| json!({}));
                if let Some(object) = body.as_object_mut() {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    object.insert("id".to_string(), json!(id));
                }
                body
            },
        };
        HttpResponse::ok(data)
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Connection { message: "connection refused".to_string() });
        }
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        Ok(self.echo(&request))
    }
}

type Responder = Box<dyn Fn(&SocketFrame) -> Option<SocketFrame> + Send + Sync>;

/// A socket whose server side lives in the test. Every sent frame goes
/// through `responder`; its answer comes back as a reply with the same ref.
pub(crate) struct LoopbackSocket {
    inbound: Mutex<Option<mpsc::UnboundedSender<SocketFrame>>>,
    pub sent: Mutex<Vec<SocketFrame>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    responder: Responder,
    next_id: AtomicI64,
}

impl LoopbackSocket {
    /// A server that acknowledges everything, assigning ids to creates.
    pub fn echo() -> Self {
        Self::with_responder(|_| None)
    }

    /// `responder` answers first; `None` falls back to the echo behavior.
    pub fn with_responder(
        responder: impl Fn(&SocketFrame) -> Option<SocketFrame> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            responder: Box::new(responder),
            next_id: AtomicI64::new(FIRST_SERVER_ID),
        }
    }

    /// Deliver a frame the server sends on its own.
    pub fn server_push(&self, frame: SocketFrame) {
        if let Some(inbound) = self.inbound.lock().as_ref() {
            let _ = inbound.send(frame);
        }
    }

    /// Drop the connection from the server side.
    pub fn hang_up(&self) {
        self.inbound.lock().take();
    }

    pub fn sent(&self) -> Vec<SocketFrame> {
        self.sent.lock().clone()
    }

    fn echo_reply(&self, frame: &SocketFrame) -> SocketFrame {
        let reference = frame.reference.unwrap_or_default();
        let data = match frame.kind {
            FrameKind::Fetch => json!([]),
            FrameKind::Create => {
                let mut data = frame.data.clone();
                if let Some(object) = data.as_object_mut() {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    object.insert("id".to_string(), json!(id));
                }
                data
            },
            FrameKind::Remove => json!({}),
            _ => frame.data.clone(),
        };
        SocketFrame::reply(reference, data)
    }
}

#[async_trait]
impl SocketTransport for LoopbackSocket {
    async fn connect(&self) -> Result<BoxStream<'static, SocketFrame>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inbound.lock().take();
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: SocketFrame) -> Result<(), TransportError> {
        self.sent.lock().push(frame.clone());
        let reply = match (self.responder)(&frame) {
            Some(mut reply) => {
                reply.reference = frame.reference;
                reply
            },
            None => self.echo_reply(&frame),
        };
        let inbound = self.inbound.lock();
        let Some(inbound) = inbound.as_ref() else {
            return Err(TransportError::Closed);
        };
        inbound.send(reply).map_err(|_| TransportError::Closed)
    }
}
