//! Classify HTTP status and transport errors into retry policy error kinds.

use super::error::RequestError;
use super::policy::ErrorKind;
use crate::transport::TransportError;

/// Classify a non-2xx HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        _ => ErrorKind::Http(code.min(u16::MAX as u32) as u16),
    }
}

/// Classify a transport error. Any network-level failure is worth retrying;
/// only an explicit abort is not.
pub fn classify_transport_error(e: &TransportError) -> ErrorKind {
    match e {
        TransportError::Curl(ce) if ce.is_operation_timedout() => ErrorKind::Timeout,
        TransportError::Curl(_) | TransportError::Io(_) => ErrorKind::Connection,
        TransportError::Aborted => ErrorKind::Other,
    }
}

/// Classify a request error into an ErrorKind.
pub fn classify(e: &RequestError) -> ErrorKind {
    match e {
        RequestError::Transport(te) => classify_transport_error(te),
        RequestError::Http(code) => classify_http_status(*code),
        RequestError::PartialTransfer { .. } => ErrorKind::Connection,
        RequestError::Protocol(_) | RequestError::Payload(_) => ErrorKind::Other,
    }
}
