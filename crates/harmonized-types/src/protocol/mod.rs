//! Transport contracts consumed by the remote channel.
//!
//! The engine never performs network I/O itself. It builds requests and hands
//! them to an [`HttpTransport`] or a [`SocketTransport`] supplied by the host.

mod http;
mod socket;

pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use socket::{FrameKind, SocketFrame, SocketTransport};
