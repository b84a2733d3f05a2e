//! Process-wide state shared by every model of one sync session.
//!
//! Holds the session connectivity signal and the transaction-id counter.
//! Independent sessions in one process each get their own context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    online: watch::Sender<bool>,
    next_transaction: AtomicU64,
}

impl SyncContext {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { inner: Arc::new(ContextInner { online: tx, next_transaction: AtomicU64::new(1) }) }
    }

    /// Flip session connectivity. Every remote channel built on this context follows.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::info!("🌐 Session connectivity changed: online={}", online);
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    pub fn connection_stream(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    /// Next transaction id for a function call, starting at 1.
    pub fn next_transaction_id(&self) -> u64 {
        self.inner.next_transaction.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext").field("online", &self.is_online()).finish_non_exhaustive()
    }
}
