//! Model schema and remote channel configuration.

mod enums;
mod remote;
mod schema;

pub use enums::{HeaderKind, Protocol};
pub use remote::{HttpHeaders, RemoteOptions};
pub use schema::{merge_json, ModelOptions, ModelSchema};
