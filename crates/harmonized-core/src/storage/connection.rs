//! One physical storage connection shared by several storage channels.

use harmonized_types::StorageError;
use std::sync::Arc;
use tokio::sync::watch;

use super::backend::StorageBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct Connection {
    backend: Arc<dyn StorageBackend>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self { backend, state })
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the backend unless it is already open or opening. Concurrent
    /// callers wait for the attempt in flight instead of starting another.
    pub async fn connect(&self) -> Result<(), StorageError> {
        let mut rx = self.state.subscribe();
        let start = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if start {
            tracing::debug!("Opening {} storage backend", self.backend.name());
            return match self.backend.open().await {
                Ok(()) => {
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::info!("💾 {} storage connected", self.backend.name());
                    Ok(())
                },
                Err(e) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    tracing::error!("Failed to open {} storage: {}", self.backend.name(), e);
                    Err(e)
                },
            };
        }

        let state = rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map_err(|e| StorageError::Unavailable { message: e.to_string() })?;
        match *state {
            ConnectionState::Connected => Ok(()),
            _ => Err(StorageError::Unavailable {
                message: format!("{} connection attempt failed", self.backend.name()),
            }),
        }
    }

    /// Mark the connection unusable. Channels on it pause until the next `connect`.
    pub fn disconnect(&self) {
        let changed = self.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        if changed {
            tracing::info!("{} storage disconnected", self.backend.name());
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .finish()
    }
}
