//! tus 1.0.0 requests: session creation (whole, partial and final),
//! offset probe and PATCH.
//!
//! Every call here is a single blocking attempt; retries are layered on top
//! by the caller.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::percent_decode_str;

use crate::auth::TokenStore;
use crate::retry::RequestError;
use crate::transport::{is_success, HttpRequest, HttpResponse, HttpStack, ProgressHandler};

pub const TUS_VERSION: &str = "1.0.0";
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";
pub const CONCAT_HEADER: &str = "Upload-Concat";

/// Decode a percent-encoded destination path ("%20" -> " ").
pub fn decode_destination(destination: &str) -> String {
    percent_decode_str(destination).decode_utf8_lossy().into_owned()
}

/// `Upload-Metadata` value: comma-separated `key base64(value)` pairs.
pub fn encode_metadata(filename: &str, filetype: &str, destination: &str, overwrite: bool) -> String {
    [
        ("filename", filename),
        ("filetype", filetype),
        ("overwrite", if overwrite { "true" } else { "false" }),
        ("destination", destination),
    ]
    .iter()
    .map(|(k, v)| format!("{} {}", k, STANDARD.encode(v.as_bytes())))
    .collect::<Vec<_>>()
    .join(",")
}

/// Metadata sent with the session that becomes the uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata<'a> {
    pub filename: &'a str,
    pub filetype: &'a str,
    /// Percent-decoded target path.
    pub destination: &'a str,
    pub overwrite: bool,
}

impl Metadata<'_> {
    pub fn encode(&self) -> String {
        encode_metadata(self.filename, self.filetype, self.destination, self.overwrite)
    }
}

/// Outcome of probing a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeProbe {
    /// The server holds this many contiguous bytes.
    Offset(u64),
    /// The session is gone or no longer matches the payload.
    Expired,
}

fn parse_offset(resp: &dyn HttpResponse) -> Result<u64, RequestError> {
    let raw = resp
        .header("Upload-Offset")
        .ok_or_else(|| RequestError::Protocol("response has no Upload-Offset header".into()))?;
    raw.trim()
        .parse()
        .map_err(|_| RequestError::Protocol(format!("invalid Upload-Offset: {:?}", raw)))
}

/// Session URL from a creation response.
fn created_location(resp: &dyn HttpResponse) -> Result<String, RequestError> {
    if !is_success(resp.status()) {
        return Err(RequestError::Http(resp.status()));
    }
    let location = resp
        .header("Location")
        .ok_or_else(|| RequestError::Protocol("creation response has no Location header".into()))?;
    if location.ends_with('/') || location.ends_with('\\') {
        return Err(RequestError::Protocol(format!(
            "creation returned an unusable Location: {:?}",
            location
        )));
    }
    Ok(location)
}

/// Sends tus requests for one endpoint through a (patched) stack.
#[derive(Clone)]
pub struct SessionClient {
    stack: Arc<dyn HttpStack>,
    auth: TokenStore,
    endpoint: String,
}

impl SessionClient {
    pub fn new(stack: Arc<dyn HttpStack>, auth: TokenStore, endpoint: impl Into<String>) -> Self {
        Self {
            stack,
            auth,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: &str, url: &str) -> Box<dyn HttpRequest> {
        let mut req = self.stack.create_request(method, url);
        req.set_header("Tus-Resumable", TUS_VERSION);
        self.auth.apply(req.as_mut());
        req
    }

    /// POST a new session for the whole payload; returns the corrected session URL.
    pub fn create(&self, length: u64, metadata: &Metadata<'_>) -> Result<String, RequestError> {
        let mut req = self.request("POST", &self.endpoint);
        req.set_header("Upload-Length", &length.to_string());
        req.set_header("Upload-Metadata", &metadata.encode());
        let location = created_location(req.send(None)?.as_ref())?;
        tracing::debug!(%location, length, "created upload session");
        Ok(location)
    }

    /// POST a partial session holding `length` bytes of a concatenated upload.
    pub fn create_partial(&self, length: u64) -> Result<String, RequestError> {
        let mut req = self.request("POST", &self.endpoint);
        req.set_header("Upload-Length", &length.to_string());
        req.set_header(CONCAT_HEADER, "partial");
        let location = created_location(req.send(None)?.as_ref())?;
        tracing::debug!(%location, length, "created partial upload session");
        Ok(location)
    }

    /// POST the final session joining `parts` in order. The server assembles
    /// the file; no body is sent.
    pub fn concatenate(&self, parts: &[String], metadata: &Metadata<'_>) -> Result<String, RequestError> {
        let mut req = self.request("POST", &self.endpoint);
        req.set_header(CONCAT_HEADER, &format!("final;{}", parts.join(" ")));
        req.set_header("Upload-Metadata", &metadata.encode());
        let location = created_location(req.send(None)?.as_ref())?;
        tracing::debug!(%location, parts = parts.len(), "concatenated partial uploads");
        Ok(location)
    }

    /// HEAD a stored session for its confirmed offset.
    pub fn probe_offset(&self, session_url: &str, expected_len: u64) -> Result<ResumeProbe, RequestError> {
        let resp = self.request("HEAD", session_url).send(None)?;
        match resp.status() {
            403 | 404 | 410 => return Ok(ResumeProbe::Expired),
            s if !is_success(s) => return Err(RequestError::Http(s)),
            _ => {}
        }
        if let Some(len) = resp.header("Upload-Length") {
            if len.trim().parse::<u64>().ok() != Some(expected_len) {
                tracing::warn!(session_url, server_length = %len, expected_len, "stored session length mismatch");
                return Ok(ResumeProbe::Expired);
            }
        }
        let offset = parse_offset(resp.as_ref())?;
        if offset > expected_len {
            return Err(RequestError::Protocol(format!(
                "server offset {} past payload end {}",
                offset, expected_len
            )));
        }
        Ok(ResumeProbe::Offset(offset))
    }

    /// PATCH `body` at session offset `offset`. Succeeds only when the server
    /// acknowledges `offset + body.len()`, which is returned.
    pub fn patch(
        &self,
        session_url: &str,
        offset: u64,
        body: &[u8],
        progress: Option<ProgressHandler>,
    ) -> Result<u64, RequestError> {
        let end = offset + body.len() as u64;
        let mut req = self.request("PATCH", session_url);
        req.set_header("Upload-Offset", &offset.to_string());
        req.set_header("Content-Type", OFFSET_CONTENT_TYPE);
        if let Some(handler) = progress {
            req.set_progress_handler(handler);
        }
        let resp = req.send(Some(body))?;
        if !is_success(resp.status()) {
            return Err(RequestError::Http(resp.status()));
        }
        let acked = parse_offset(resp.as_ref())?;
        if acked < end {
            return Err(RequestError::PartialTransfer {
                expected: body.len() as u64,
                received: acked.saturating_sub(offset),
            });
        }
        if acked > end {
            return Err(RequestError::Protocol(format!(
                "server acknowledged offset {} for a body ending at {}",
                acked, end
            )));
        }
        Ok(end)
    }
}
