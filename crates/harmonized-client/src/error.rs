//! Error types for the HTTP transport.

use harmonized_types::TransportError;
use thiserror::Error;

/// Errors that can occur while sending a request.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to establish connection to the server.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// HTTP request failed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned a body that is not JSON.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Server returned 429 Too Many Requests.
    #[error("Rate limited (429): retry after {retry_after:?}s")]
    RateLimited {
        /// Seconds to wait before retrying, if provided by server.
        retry_after: Option<u64>,
    },

    /// Server returned a 5xx error.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Server rejected the request (4xx other than 429).
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Retries exhausted.
    #[error("Timeout after {0} attempts")]
    Timeout(u32),
}

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connection(message) => Self::Connection { message },
            ClientError::Request(e) if e.is_timeout() => Self::Timeout { attempts: 1 },
            ClientError::Request(e) => Self::Connection { message: e.to_string() },
            ClientError::InvalidResponse(message) => Self::InvalidResponse { message },
            ClientError::RateLimited { .. } => {
                Self::Status { status: 429, message: "rate limited".to_string() }
            },
            ClientError::ServerError { status, message } | ClientError::Rejected { status, message } => {
                Self::Status { status, message }
            },
            ClientError::Timeout(attempts) => Self::Timeout { attempts },
        }
    }
}
