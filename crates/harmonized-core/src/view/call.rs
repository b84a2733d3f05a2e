//! Pending remote function calls.

use harmonized_types::{Record, SyncError, SyncErrorEvent};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};

use crate::router::RouterHandle;

/// What a caller hears about its call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Not delivered yet; the call stays queued and may still resolve
    Pending(SyncError),
    /// The server answered; the record carries `fnReturn`
    Resolved(Record),
    Rejected(SyncError),
}

/// A function call in flight, matched by its transaction id.
///
/// The result reaches it directly from the router, so a busy presentation
/// stream cannot crowd it out. Dropping it stops listening; the call itself
/// is not withdrawn.
pub struct FunctionCall {
    transaction_id: u64,
    router: RouterHandle,
    result: oneshot::Receiver<Record>,
    errors: broadcast::Receiver<SyncErrorEvent>,
    finished: bool,
}

impl FunctionCall {
    /// Must be created before the call is sent.
    pub(crate) fn new(transaction_id: u64, router: RouterHandle) -> Self {
        let result = router.expect_function_result(transaction_id);
        let errors = router.subscribe_errors();
        Self { transaction_id, router, result, errors, finished: false }
    }

    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// Next event for this call. `None` once it resolved or was rejected.
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        if self.finished {
            return None;
        }
        loop {
            tokio::select! {
                result = &mut self.result => {
                    self.finished = true;
                    return Some(match result {
                        Ok(record) => CallEvent::Resolved(record),
                        Err(_) => CallEvent::Rejected(SyncError::Disconnected),
                    });
                },
                event = self.errors.recv() => match event {
                    Ok(event) if event.transaction_id() == Some(self.transaction_id) => {
                        if event.error == SyncError::Disconnected || event.error.is_transient() {
                            return Some(CallEvent::Pending(event.error));
                        }
                        self.finished = true;
                        return Some(CallEvent::Rejected(event.error));
                    },
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Call {} skipped {} error events", self.transaction_id, skipped);
                    },
                    Err(RecvError::Closed) => {
                        self.finished = true;
                        return Some(CallEvent::Rejected(SyncError::Disconnected));
                    },
                },
            }
        }
    }

    /// Wait through any pending notifications for the final outcome.
    /// Resolves with `fnReturn`, or `Null` when the server sent nothing.
    pub async fn result(mut self) -> Result<Value, SyncError> {
        while let Some(event) = self.next_event().await {
            match event {
                CallEvent::Pending(reason) => {
                    tracing::debug!("Call {} pending: {}", self.transaction_id, reason);
                },
                CallEvent::Resolved(record) => return Ok(record.fn_return().cloned().unwrap_or(Value::Null)),
                CallEvent::Rejected(error) => return Err(error),
            }
        }
        Err(SyncError::Disconnected)
    }
}

impl Drop for FunctionCall {
    fn drop(&mut self) {
        self.router.forget_function_result(self.transaction_id);
    }
}

impl std::fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCall")
            .field("transaction_id", &self.transaction_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
