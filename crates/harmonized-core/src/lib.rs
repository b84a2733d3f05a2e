//! # Harmonized Core
//!
//! Keeps one set of records consistent across three replicas: the remote
//! server, a local database and the in-memory presentation layer.
//!
//! ## Architecture
//!
//! ```text
//! harmonized-core/src/
//! ├── context.rs   # SyncContext: session connectivity + transaction ids
//! ├── registry/    # IdentityRegistry: rtId / storeId / serverId tables
//! ├── router/      # SyncRouter + RouterHandle: reconciliation and forwarding
//! ├── storage/     # StorageChannel, backends (SQLite, memory), metadata, selector
//! ├── remote/      # RemoteChannel, HTTP and socket adapters, unpushed queue
//! ├── view/        # ViewCollection, FunctionCall
//! ├── model.rs     # Model facade wiring all of the above
//! └── modules/     # schema files, logging
//! ```

#![allow(
    clippy::significant_drop_tightening,
    reason = "Registry and queue guards are held for one reconciliation step on purpose"
)]
#![allow(clippy::module_name_repetitions, reason = "Channel types read better fully named")]
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::indexing_slicing,
        clippy::needless_collect,
        clippy::assertions_on_result_states
    )
)]

pub mod context;
pub mod model;
pub mod modules;
pub mod registry;
pub mod remote;
pub mod router;
pub mod storage;
pub mod utils;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use context::SyncContext;
pub use model::{Model, ModelBuilder, LAST_MODIFIED_KEY};
pub use modules::config::{load_schema, save_schema, validate_schema, SCHEMA_FILE};
pub use modules::logger::init_logging;
pub use registry::{IdentityRegistry, MatchedBy, Reconciled};
pub use remote::{RemoteChannel, RemoteConfig, RemoteHooks, Transports};
pub use router::{RouterHandle, SyncRouter};
pub use storage::{BackendSelector, Connection, StorageBackend, StorageChannel};
pub use view::{CallEvent, FunctionCall, ViewCollection, ViewItem};
