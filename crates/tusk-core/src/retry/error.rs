//! Single-request error type for retry classification.

use std::fmt;

use crate::transport::TransportError;

/// Error returned by one upload request attempt (session probe, creation or chunk).
/// Used so we can classify and decide retries before surfacing a terminal error.
#[derive(Debug)]
pub enum RequestError {
    /// The transport failed before an HTTP response arrived.
    Transport(TransportError),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// Server stored fewer bytes than the chunk carried. Retried like a network error.
    PartialTransfer { expected: u64, received: u64 },
    /// Response was well-formed HTTP but broke the upload protocol. Not retried.
    Protocol(String),
    /// Reading the chunk from the payload failed. Not retried.
    Payload(std::io::Error),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Transport(e) => write!(f, "{}", e),
            RequestError::Http(code) => write!(f, "HTTP {}", code),
            RequestError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: server confirmed {} of {} bytes", received, expected)
            }
            RequestError::Protocol(msg) => write!(f, "protocol: {}", msg),
            RequestError::Payload(e) => write!(f, "payload: {}", e),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Transport(e) => Some(e),
            RequestError::Payload(e) => Some(e),
            RequestError::Http(_)
            | RequestError::PartialTransfer { .. }
            | RequestError::Protocol(_) => None,
        }
    }
}

impl From<TransportError> for RequestError {
    fn from(e: TransportError) -> Self {
        RequestError::Transport(e)
    }
}
