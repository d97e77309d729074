//! libcurl-backed stack: one `Easy` handle per request, run on the calling thread.

use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use curl::easy::{Easy, List};

use super::{HeaderMap, HttpRequest, HttpResponse, HttpStack, ProgressHandler, TransportError};

/// Per-request curl tuning.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/sec for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard wall-clock limit for a single request.
    pub timeout: Duration,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurlStack {
    options: CurlOptions,
}

impl CurlStack {
    pub fn new(options: CurlOptions) -> Self {
        Self { options }
    }
}

impl HttpStack for CurlStack {
    fn create_request(&self, method: &str, url: &str) -> Box<dyn HttpRequest> {
        Box::new(CurlRequest {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            headers: HeaderMap::new(),
            progress: None,
            abort: AbortState::default(),
            options: self.options,
        })
    }

    fn name(&self) -> &str {
        "CurlStack"
    }

    fn is_supported(&self) -> bool {
        curl::Version::get()
            .protocols()
            .any(|p| p.eq_ignore_ascii_case("http"))
    }
}

/// Abort flag plus a "send is running" latch so `abort()` can wait for the
/// transfer to notice.
#[derive(Default)]
struct AbortState {
    requested: AtomicBool,
    running: Mutex<bool>,
    idle: Condvar,
}

impl AbortState {
    fn begin(&self) {
        *self.running.lock().unwrap() = true;
    }

    fn end(&self) {
        *self.running.lock().unwrap() = false;
        self.idle.notify_all();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

/// Header list handed to curl. An empty `Name:` entry removes a header curl
/// would otherwise add on its own.
fn header_lines(method: &str, headers: &HeaderMap) -> Vec<String> {
    let mut lines: Vec<String> = headers.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
    // Suppress `Expect: 100-continue`; chunk bodies are sent straight away.
    lines.push("Expect:".to_string());
    // CURLOPT_POST implies a form content type.
    if !matches!(method, "GET" | "HEAD") && headers.get("Content-Type").is_none() {
        lines.push("Content-Type:".to_string());
    }
    lines
}

struct CurlRequest {
    method: String,
    url: String,
    headers: HeaderMap,
    progress: Option<ProgressHandler>,
    abort: AbortState,
    options: CurlOptions,
}

impl CurlRequest {
    fn perform(&self, body: &[u8]) -> Result<CurlResponse, TransportError> {
        let mut easy = Easy::new();
        easy.url(&self.url)?;
        easy.connect_timeout(self.options.connect_timeout)?;
        easy.low_speed_limit(self.options.low_speed_limit)?;
        easy.low_speed_time(self.options.low_speed_time)?;
        easy.timeout(self.options.timeout)?;
        easy.progress(true)?;

        match self.method.as_str() {
            "GET" => {}
            "HEAD" => easy.nobody(true)?,
            method => {
                easy.post(true)?;
                easy.post_field_size(body.len() as u64)?;
                if method != "POST" {
                    easy.custom_request(method)?;
                }
            }
        }

        let mut list = List::new();
        for line in header_lines(&self.method, &self.headers) {
            list.append(&line)?;
        }
        easy.http_headers(list)?;

        let mut header_lines: Vec<String> = Vec::new();
        let mut response_body: Vec<u8> = Vec::new();
        let mut remaining = body;
        {
            let mut transfer = easy.transfer();
            transfer.read_function(|buf| {
                let n = buf.len().min(remaining.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                remaining = &remaining[n..];
                Ok(n)
            })?;
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    // A new status line starts a new header block (interim 1xx responses).
                    if s.starts_with("HTTP/") {
                        header_lines.clear();
                    }
                    header_lines.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.write_function(|data| {
                response_body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.progress_function(|_dltotal, _dlnow, _ultotal, ulnow| {
                if self.abort.is_requested() {
                    return false;
                }
                if let Some(handler) = &self.progress {
                    handler(ulnow as u64);
                }
                true
            })?;
            if let Err(e) = transfer.perform() {
                if e.is_aborted_by_callback() && self.abort.is_requested() {
                    return Err(TransportError::Aborted);
                }
                return Err(TransportError::Curl(e));
            }
        }

        let status = easy.response_code()?;
        Ok(CurlResponse {
            status,
            headers: HeaderMap::from_lines(&header_lines),
            body: response_body,
        })
    }
}

impl HttpRequest for CurlRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    fn set_progress_handler(&mut self, handler: ProgressHandler) {
        self.progress = Some(handler);
    }

    fn send(&self, body: Option<&[u8]>) -> Result<Box<dyn HttpResponse>, TransportError> {
        if self.abort.is_requested() {
            return Err(TransportError::Aborted);
        }
        self.abort.begin();
        let result = self.perform(body.unwrap_or_default());
        self.abort.end();
        tracing::trace!(method = %self.method, url = %self.url, ok = result.is_ok(), "curl request finished");
        result.map(|r| Box::new(r) as Box<dyn HttpResponse>)
    }

    fn abort(&self) {
        self.abort.requested.store(true, Ordering::Relaxed);
        let mut running = self.abort.running.lock().unwrap();
        while *running {
            running = self.abort.idle.wait(running).unwrap();
        }
    }
}

struct CurlResponse {
    status: u32,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpResponse for CurlResponse {
    fn status(&self) -> u32 {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name).map(str::to_string)
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}
