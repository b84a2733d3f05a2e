//! # Harmonized Types
//!
//! Records, identities, configuration and transport contracts shared by the
//! Harmonized crates.
//!
//! - **`error`** - Typed error hierarchy (sync, transport, storage, config)
//! - **`models`** - Records, ids, actions and the model schema
//! - **`protocol`** - HTTP and socket transport contracts
//!
//! ## Architecture Role
//!
//! ```text
//!              harmonized-types (this crate)
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!   harmonized-core            harmonized-client
//!          │                           │
//!          └─────────────┬─────────────┘
//!                        ▼
//!                 harmonized-cli
//! ```

pub mod error;
pub mod models;
pub mod protocol;

// Re-export error types for convenience
pub use error::{ConfigError, Result, StorageError, SyncError, SyncErrorEvent, TransportError};

// Re-export core model types
pub use models::{
    Action, Data, HeaderKind, HttpHeaders, KeyNames, Meta, ModelOptions, ModelSchema, Protocol,
    Record, RecordKey, RemoteOptions, FN_RETURN_FIELD,
};
pub use protocol::{
    FrameKind, HttpMethod, HttpRequest, HttpResponse, HttpTransport, SocketFrame, SocketTransport,
};
