//! Scripted in-memory stack and a small tus server model for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    last_path_segment, HeaderMap, HttpRequest, HttpResponse, HttpStack, ProgressHandler,
    TransportError,
};

pub(crate) const TEST_ENDPOINT: &str = "https://public.example.com/api/tus";
pub(crate) const TEST_SETTINGS_URL: &str = "https://public.example.com/api/settings";

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body_len: usize,
}

impl RecordedRequest {
    pub fn offset(&self) -> Option<u64> {
        self.headers.get("Upload-Offset")?.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedResponse {
    pub status: u32,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ScriptedResponse {
    pub fn new(status: u32) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        for (k, v) in headers {
            self.headers.insert(k, v);
        }
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }
}

type Handler = dyn Fn(&RecordedRequest) -> Result<ScriptedResponse, TransportError> + Send + Sync;

struct Shared {
    handler: Box<Handler>,
    log: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    supported: AtomicBool,
}

/// Stack whose responses come from a closure; records every request sent.
#[derive(Clone)]
pub(crate) struct ScriptedStack {
    shared: Arc<Shared>,
}

impl ScriptedStack {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Result<ScriptedResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                handler: Box::new(handler),
                log: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                supported: AtomicBool::new(true),
            }),
        }
    }

    /// Stack backed by a [`MockTus`] server model.
    pub fn tus(server: Arc<MockTus>) -> Self {
        Self::new(move |req| server.handle(req))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.shared
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_supported(&self, supported: bool) {
        self.shared.supported.store(supported, Ordering::SeqCst);
    }
}

impl HttpStack for ScriptedStack {
    fn create_request(&self, method: &str, url: &str) -> Box<dyn HttpRequest> {
        Box::new(ScriptedRequest {
            shared: Arc::clone(&self.shared),
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            headers: HeaderMap::new(),
            progress: None,
            aborted: AtomicBool::new(false),
        })
    }

    fn name(&self) -> &str {
        "ScriptedStack"
    }

    fn is_supported(&self) -> bool {
        self.shared.supported.load(Ordering::SeqCst)
    }
}

struct ScriptedRequest {
    shared: Arc<Shared>,
    method: String,
    url: String,
    headers: HeaderMap,
    progress: Option<ProgressHandler>,
    aborted: AtomicBool,
}

impl HttpRequest for ScriptedRequest {
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
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TransportError::Aborted);
        }
        let recorded = RecordedRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body_len: body.map(<[u8]>::len).unwrap_or(0),
        };
        self.shared.log.lock().unwrap().push(recorded.clone());

        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(progress) = &self.progress {
            progress(recorded.body_len as u64);
        }
        let result = (self.shared.handler)(&recorded);
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map(|r| Box::new(r) as Box<dyn HttpResponse>)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl HttpResponse for ScriptedResponse {
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

#[derive(Debug, Default)]
struct MockSession {
    length: u64,
    offset: u64,
    partial: bool,
    /// Ids of the partials a final session was assembled from.
    parts: Option<Vec<String>>,
    /// A PATCH is being applied.
    busy: bool,
}

#[derive(Default)]
struct MockTusState {
    next_id: u32,
    sessions: HashMap<String, MockSession>,
    failing_patches: u32,
    failing_session: Option<String>,
}

/// In-memory tus server: creation, concatenation, offset probe and PATCH.
///
/// Enforces the core offset rule: a PATCH must start at the session's
/// current offset (409 otherwise) and only one PATCH per session may be in
/// progress (423). Returns `Location` headers on an internal host, the way
/// the proxy leaks them, and serves `{"tus": ...}` settings on
/// `TEST_SETTINGS_URL`.
pub(crate) struct MockTus {
    state: Mutex<MockTusState>,
    settings_json: String,
    patch_delay: Duration,
    fail_status: u32,
}

impl MockTus {
    pub fn new(enabled: bool, chunk_size: u64) -> Self {
        Self {
            state: Mutex::new(MockTusState::default()),
            settings_json: format!(
                r#"{{"signup":false,"tus":{{"enabled":{},"chunkSize":{}}}}}"#,
                enabled, chunk_size
            ),
            patch_delay: Duration::ZERO,
            fail_status: 500,
        }
    }

    /// Hold every accepted PATCH this long before committing it.
    pub fn with_patch_delay(mut self, delay: Duration) -> Self {
        self.patch_delay = delay;
        self
    }

    /// Make the next `n` PATCH requests fail with `status`.
    pub fn fail_next_patches(&mut self, n: u32, status: u32) {
        self.state.get_mut().unwrap().failing_patches = n;
        self.fail_status = status;
    }

    /// Make every PATCH to the `nth` created session (1-based) fail with `status`.
    pub fn fail_session_patches(&mut self, nth: u32, status: u32) {
        self.state.get_mut().unwrap().failing_session = Some(format!("upload{:04}", nth));
        self.fail_status = status;
    }

    /// Register a session that already holds the first `confirmed` bytes.
    pub fn preload(&self, id: &str, length: u64, confirmed: u64) {
        self.insert(id, length, confirmed, false);
    }

    /// Register a partial session that already holds the first `confirmed` bytes.
    pub fn preload_partial(&self, id: &str, length: u64, confirmed: u64) {
        self.insert(id, length, confirmed, true);
    }

    fn insert(&self, id: &str, length: u64, offset: u64, partial: bool) {
        self.state.lock().unwrap().sessions.insert(
            id.to_string(),
            MockSession {
                length,
                offset,
                partial,
                ..MockSession::default()
            },
        );
    }

    pub fn confirmed(&self, id: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).map(|s| s.offset)
    }

    /// Partial ids a final session was built from, `None` for other sessions.
    pub fn concat_parts(&self, id: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).and_then(|s| s.parts.clone())
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn handle(&self, req: &RecordedRequest) -> Result<ScriptedResponse, TransportError> {
        if req.method == "GET" && req.url == TEST_SETTINGS_URL {
            return Ok(ScriptedResponse::new(200).with_body(self.settings_json.as_bytes()));
        }
        match req.method.as_str() {
            "POST" => Ok(self.create(req)),
            "HEAD" => {
                let state = self.state.lock().unwrap();
                match state.sessions.get(last_path_segment(&req.url)) {
                    Some(s) => Ok(ScriptedResponse::new(200)
                        .with_header("Upload-Offset", &s.offset.to_string())
                        .with_header("Upload-Length", &s.length.to_string())),
                    None => Ok(ScriptedResponse::new(404)),
                }
            }
            "PATCH" => Ok(self.patch(req)),
            _ => Ok(ScriptedResponse::new(405)),
        }
    }

    fn create(&self, req: &RecordedRequest) -> ScriptedResponse {
        let mut state = self.state.lock().unwrap();
        let concat = req.headers.get("Upload-Concat");
        let session = match concat.and_then(|v| v.strip_prefix("final;")) {
            Some(list) => {
                let ids: Vec<String> = list
                    .split_whitespace()
                    .map(|u| last_path_segment(u).to_string())
                    .collect();
                let mut length = 0;
                for id in &ids {
                    match state.sessions.get(id) {
                        Some(p) if p.partial && p.offset == p.length => length += p.length,
                        _ => return ScriptedResponse::new(400),
                    }
                }
                if ids.is_empty() {
                    return ScriptedResponse::new(400);
                }
                MockSession {
                    length,
                    offset: length,
                    parts: Some(ids),
                    ..MockSession::default()
                }
            }
            None => {
                let length: u64 = match req.headers.get("Upload-Length").map(str::parse) {
                    Some(Ok(n)) => n,
                    _ => return ScriptedResponse::new(400),
                };
                MockSession {
                    length,
                    partial: concat == Some("partial"),
                    ..MockSession::default()
                }
            }
        };
        state.next_id += 1;
        let id = format!("upload{:04}", state.next_id);
        state.sessions.insert(id.clone(), session);
        ScriptedResponse::new(201)
            .with_header("Location", &format!("http://internal-host:8080/files/{id}"))
            .with_header("Tus-Resumable", "1.0.0")
    }

    fn patch(&self, req: &RecordedRequest) -> ScriptedResponse {
        let id = last_path_segment(&req.url).to_string();
        let end = {
            let mut state = self.state.lock().unwrap();
            if state.failing_patches > 0 {
                state.failing_patches -= 1;
                return ScriptedResponse::new(self.fail_status);
            }
            if state.failing_session.as_deref() == Some(id.as_str()) {
                return ScriptedResponse::new(self.fail_status);
            }
            let Some(offset) = req.offset() else {
                return ScriptedResponse::new(400);
            };
            let Some(session) = state.sessions.get_mut(&id) else {
                return ScriptedResponse::new(404);
            };
            if session.parts.is_some() {
                return ScriptedResponse::new(403);
            }
            if session.busy {
                return ScriptedResponse::new(423);
            }
            if offset != session.offset {
                return ScriptedResponse::new(409);
            }
            let end = offset + req.body_len as u64;
            if end > session.length {
                return ScriptedResponse::new(413);
            }
            session.busy = true;
            end
        };
        if !self.patch_delay.is_zero() {
            std::thread::sleep(self.patch_delay);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(session) = state.sessions.get_mut(&id) {
            session.offset = end;
            session.busy = false;
        }
        ScriptedResponse::new(204).with_header("Upload-Offset", &end.to_string())
    }
}
