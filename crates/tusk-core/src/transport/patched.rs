//! Stack decorator that corrects the `Location` response header.

use super::location::correct_location;
use super::{HttpRequest, HttpResponse, HttpStack, ProgressHandler, TransportError};

/// Wraps a stack so every response reports `Location` relative to `endpoint`.
///
/// The session URL returned by a creation request is used to address every
/// subsequent chunk, so it must be corrected before the controller reads it.
pub struct PatchedStack<S> {
    inner: S,
    endpoint: String,
}

impl<S: HttpStack> PatchedStack<S> {
    pub fn new(inner: S, endpoint: impl Into<String>) -> Self {
        Self {
            inner,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: HttpStack> HttpStack for PatchedStack<S> {
    fn create_request(&self, method: &str, url: &str) -> Box<dyn HttpRequest> {
        Box::new(PatchedRequest {
            inner: self.inner.create_request(method, url),
            endpoint: self.endpoint.clone(),
        })
    }

    fn name(&self) -> &str {
        "PatchedStack"
    }

    fn is_supported(&self) -> bool {
        self.inner.is_supported()
    }
}

struct PatchedRequest {
    inner: Box<dyn HttpRequest>,
    endpoint: String,
}

impl HttpRequest for PatchedRequest {
    fn method(&self) -> &str {
        self.inner.method()
    }

    fn url(&self) -> &str {
        self.inner.url()
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.inner.set_header(name, value);
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.inner.header(name)
    }

    fn set_progress_handler(&mut self, handler: ProgressHandler) {
        self.inner.set_progress_handler(handler);
    }

    fn send(&self, body: Option<&[u8]>) -> Result<Box<dyn HttpResponse>, TransportError> {
        let inner = self.inner.send(body)?;
        Ok(Box::new(PatchedResponse {
            inner,
            endpoint: self.endpoint.clone(),
        }))
    }

    fn abort(&self) {
        self.inner.abort();
    }
}

struct PatchedResponse {
    inner: Box<dyn HttpResponse>,
    endpoint: String,
}

impl HttpResponse for PatchedResponse {
    fn status(&self) -> u32 {
        self.inner.status()
    }

    fn header(&self, name: &str) -> Option<String> {
        let raw = self.inner.header(name)?;
        if name.eq_ignore_ascii_case("location") {
            let fixed = correct_location(&self.endpoint, &raw);
            tracing::debug!(raw = %raw, fixed = %fixed, "corrected Location header");
            return Some(fixed);
        }
        Some(raw)
    }

    fn body(&self) -> &[u8] {
        self.inner.body()
    }
}
