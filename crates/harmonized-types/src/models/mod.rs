//! Domain models for Harmonized.

mod action;
mod config;
mod record;

pub use action::Action;
pub use config::{
    merge_json, HeaderKind, HttpHeaders, ModelOptions, ModelSchema, Protocol, RemoteOptions,
};
pub use record::{
    Data, KeyNames, Meta, Record, RecordKey, FN_ARGS_FIELD, FN_NAME_FIELD, FN_RETURN_FIELD,
};
