//! Pluggable HTTP execution layer.
//!
//! The upload controller talks to the network only through [`HttpStack`]
//! (request factory), [`HttpRequest`] and [`HttpResponse`]. [`CurlStack`] is
//! the production implementation; [`PatchedStack`] wraps any stack and
//! rewrites the `Location` response header so session URLs point at the
//! configured endpoint instead of the address the proxy leaked.

mod curl_stack;
mod headers;
mod location;
mod patched;

#[cfg(test)]
pub(crate) mod testing;

pub use curl_stack::{CurlOptions, CurlStack};
pub use headers::HeaderMap;
pub use location::{correct_location, last_path_segment};
pub use patched::PatchedStack;

/// Callback receiving the number of request body bytes sent so far.
pub type ProgressHandler = Box<dyn Fn(u64) + Send + Sync>;

/// Transport-level failure: the request never produced an HTTP response.
///
/// HTTP error statuses are not errors at this layer; they come back as
/// ordinary responses for the caller to interpret.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Curl(#[from] curl::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("request aborted")]
    Aborted,
}

/// Factory for requests. One stack is shared by every request of an uploader.
pub trait HttpStack: Send + Sync {
    fn create_request(&self, method: &str, url: &str) -> Box<dyn HttpRequest>;

    fn name(&self) -> &str;

    /// Whether this environment can perform chunked uploads at all.
    fn is_supported(&self) -> bool {
        true
    }
}

pub trait HttpRequest: Send + Sync {
    fn method(&self) -> &str;

    fn url(&self) -> &str;

    fn set_header(&mut self, name: &str, value: &str);

    fn header(&self, name: &str) -> Option<&str>;

    /// Attach an upload progress listener. Stacks that cannot report upload
    /// progress ignore the handler.
    fn set_progress_handler(&mut self, handler: ProgressHandler);

    /// Execute the request. Blocks until the response is complete.
    fn send(&self, body: Option<&[u8]>) -> Result<Box<dyn HttpResponse>, TransportError>;

    /// Cancel a running `send`. Returns once the transfer has stopped; a later
    /// `send` on the same request fails with [`TransportError::Aborted`].
    fn abort(&self);
}

pub trait HttpResponse: Send {
    fn status(&self) -> u32;

    fn header(&self, name: &str) -> Option<String>;

    fn body(&self) -> &[u8];
}

/// True for 2xx status codes.
pub fn is_success(status: u32) -> bool {
    (200..300).contains(&status)
}
