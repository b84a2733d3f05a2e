//! HTTP transport for Harmonized remote channels.
//!
//! [`ReqwestTransport`] implements [`harmonized_types::HttpTransport`] on top of
//! a shared `reqwest::Client`, retrying rate-limited and 5xx answers with
//! exponential backoff.

mod client;
mod error;
mod types;

pub use client::ReqwestTransport;
pub use error::ClientError;
pub use types::*;
