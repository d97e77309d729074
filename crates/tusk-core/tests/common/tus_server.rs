//! Minimal HTTP/1.1 tus server for integration tests.
//!
//! Serves `GET /api/settings`, `POST /api/tus` (creation, including the
//! `Upload-Concat` partial/final forms), `HEAD` and `PATCH` on
//! `/api/tus/<id>`. Creation answers with a `Location` on an internal host,
//! the way a misconfigured reverse proxy would. A PATCH must start at the
//! session's current offset. Uploaded bytes are kept in memory so tests can
//! compare them with the source.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TusServerOptions {
    pub enabled: bool,
    pub chunk_size: u64,
    /// Delay before answering each PATCH (makes concurrency observable).
    pub patch_delay: Duration,
    /// The next N PATCH requests answer 500 without storing anything.
    pub fail_patches: usize,
    /// If set, requests without this `X-Auth` value get 401.
    pub token: Option<String>,
}

impl Default for TusServerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 1024,
            patch_delay: Duration::ZERO,
            fail_patches: 0,
            token: None,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    length: usize,
    /// Bytes received so far; its length is the session offset.
    data: Vec<u8>,
    metadata: String,
    partial: bool,
    /// Partial ids a final session was assembled from.
    parts: Option<Vec<String>>,
    busy: bool,
}

#[derive(Debug, Clone)]
struct Logged {
    method: String,
    path: String,
    content_type: Option<String>,
}

#[derive(Default)]
struct State {
    next_id: usize,
    sessions: HashMap<String, Session>,
    fail_patches: usize,
    fail_from: Option<usize>,
    log: Vec<Logged>,
}

/// Handle to a running server. The server runs until the process exits.
#[derive(Clone)]
pub struct TusServer {
    pub base: String,
    state: Arc<Mutex<State>>,
    patches_in_flight: Arc<AtomicUsize>,
    max_patches_in_flight: Arc<AtomicUsize>,
}

impl TusServer {
    pub fn endpoint(&self) -> String {
        format!("{}/api/tus", self.base)
    }

    pub fn settings_url(&self) -> String {
        format!("{}/api/settings", self.base)
    }

    /// Bytes stored for session `id`.
    pub fn uploaded(&self, id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).map(|s| s.data.clone())
    }

    /// Ids of sessions created by concatenation.
    pub fn final_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.parts.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn concat_parts(&self, id: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).and_then(|s| s.parts.clone())
    }

    pub fn metadata(&self, id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).map(|s| s.metadata.clone())
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// (method, path) of every request received, in arrival order.
    pub fn requests(&self) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap();
        state
            .log
            .iter()
            .map(|l| (l.method.clone(), l.path.clone()))
            .collect()
    }

    /// `Content-Type` of every `method` request, in arrival order.
    pub fn content_types(&self, method: &str) -> Vec<Option<String>> {
        let state = self.state.lock().unwrap();
        state
            .log
            .iter()
            .filter(|l| l.method == method)
            .map(|l| l.content_type.clone())
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests().iter().filter(|(m, _)| m == method).count()
    }

    pub fn max_concurrent_patches(&self) -> usize {
        self.max_patches_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_next_patches(&self, n: usize) {
        self.state.lock().unwrap().fail_patches = n;
    }

    /// While set, every PATCH starting at or past `offset` answers 500.
    pub fn fail_patches_from(&self, offset: Option<usize>) {
        self.state.lock().unwrap().fail_from = offset;
    }
}

/// Starts a server on an ephemeral port.
pub fn start(opts: TusServerOptions) -> TusServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let server = TusServer {
        base: format!("http://127.0.0.1:{}", port),
        state: Arc::new(Mutex::new(State {
            fail_patches: opts.fail_patches,
            ..State::default()
        })),
        patches_in_flight: Arc::new(AtomicUsize::new(0)),
        max_patches_in_flight: Arc::new(AtomicUsize::new(0)),
    };
    let handle = server.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let server = handle.clone();
            let opts = opts.clone();
            thread::spawn(move || serve(stream, &server, &opts));
        }
    });
    server
}

struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }
    body.truncate(content_length);
    Some(Request {
        method,
        path,
        headers,
        body,
    })
}

fn respond(stream: &mut TcpStream, status: &str, headers: &[(&str, String)], body: &[u8]) {
    let mut out = format!("HTTP/1.1 {}\r\nConnection: close\r\nTus-Resumable: 1.0.0\r\n", status);
    for (k, v) in headers {
        out.push_str(&format!("{}: {}\r\n", k, v));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let _ = stream.write_all(out.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

fn serve(mut stream: TcpStream, server: &TusServer, opts: &TusServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };
    server.state.lock().unwrap().log.push(Logged {
        method: req.method.clone(),
        path: req.path.clone(),
        content_type: req.header("Content-Type").map(str::to_string),
    });

    if let Some(token) = &opts.token {
        if req.header("X-Auth") != Some(token.as_str()) {
            respond(&mut stream, "401 Unauthorized", &[], b"");
            return;
        }
    }

    let id = req.path.strip_prefix("/api/tus/").map(str::to_string);
    match (req.method.as_str(), req.path.as_str(), id) {
        ("GET", "/api/settings", _) => {
            let body = format!(
                r#"{{"signup":false,"createUserDir":false,"tus":{{"enabled":{},"chunkSize":{}}}}}"#,
                opts.enabled, opts.chunk_size
            );
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Type", "application/json".to_string())],
                body.as_bytes(),
            );
        }
        ("POST", "/api/tus", _) => match create(server, &req) {
            Ok(id) => respond(
                &mut stream,
                "201 Created",
                &[("Location", format!("http://tusd.internal:1080/files/{}", id))],
                b"",
            ),
            Err(status) => respond(&mut stream, status, &[], b""),
        },
        ("HEAD", _, Some(id)) => {
            let state = server.state.lock().unwrap();
            match state.sessions.get(&id) {
                Some(s) => {
                    let headers = [
                        ("Upload-Offset", s.data.len().to_string()),
                        ("Upload-Length", s.length.to_string()),
                        ("Cache-Control", "no-store".to_string()),
                    ];
                    respond_head(&mut stream, &headers);
                }
                None => respond_head(&mut stream, &[]),
            }
        }
        ("PATCH", _, Some(id)) => {
            let now = server.patches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            server.max_patches_in_flight.fetch_max(now, Ordering::SeqCst);
            let result = begin_patch(server, &id, &req);
            if !opts.patch_delay.is_zero() {
                thread::sleep(opts.patch_delay);
            }
            let result = result.map(|_| finish_patch(server, &id, &req.body));
            server.patches_in_flight.fetch_sub(1, Ordering::SeqCst);
            match result {
                Ok(end) => respond(&mut stream, "204 No Content", &[("Upload-Offset", end.to_string())], b""),
                Err(status) => respond(&mut stream, status, &[], b""),
            }
        }
        _ => respond(&mut stream, "404 Not Found", &[], b""),
    }
}

/// HEAD has no body; an empty header list means the session is unknown.
fn respond_head(stream: &mut TcpStream, headers: &[(&str, String)]) {
    if headers.is_empty() {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    let mut out = String::from("HTTP/1.1 200 OK\r\nConnection: close\r\nTus-Resumable: 1.0.0\r\n");
    for (k, v) in headers {
        out.push_str(&format!("{}: {}\r\n", k, v));
    }
    out.push_str("\r\n");
    let _ = stream.write_all(out.as_bytes());
}

/// Creates a session (whole, partial or final) and returns its id.
fn create(server: &TusServer, req: &Request) -> Result<String, &'static str> {
    let metadata = req.header("Upload-Metadata").unwrap_or_default().to_string();
    let concat = req.header("Upload-Concat");
    let mut state = server.state.lock().unwrap();
    let session = match concat.and_then(|v| v.strip_prefix("final;")) {
        Some(list) => {
            let ids: Vec<String> = list
                .split_whitespace()
                .filter_map(|url| url.rsplit('/').next())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Err("400 Bad Request");
            }
            let mut data = Vec::new();
            for id in &ids {
                match state.sessions.get(id) {
                    Some(p) if p.partial && p.data.len() == p.length => data.extend_from_slice(&p.data),
                    _ => return Err("400 Bad Request"),
                }
            }
            Session {
                length: data.len(),
                data,
                metadata,
                parts: Some(ids),
                ..Session::default()
            }
        }
        None => {
            let length = req
                .header("Upload-Length")
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or("400 Bad Request")?;
            Session {
                length,
                metadata,
                partial: concat == Some("partial"),
                ..Session::default()
            }
        }
    };
    state.next_id += 1;
    let id = format!("{:032x}", state.next_id);
    state.sessions.insert(id.clone(), session);
    Ok(id)
}

/// Validates a PATCH against the session and marks the session busy.
fn begin_patch(server: &TusServer, id: &str, req: &Request) -> Result<(), &'static str> {
    let mut state = server.state.lock().unwrap();
    if state.fail_patches > 0 {
        state.fail_patches -= 1;
        return Err("500 Internal Server Error");
    }
    if req.header("Content-Type") != Some("application/offset+octet-stream") {
        return Err("415 Unsupported Media Type");
    }
    let start = req
        .header("Upload-Offset")
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or("400 Bad Request")?;
    if state.fail_from.is_some_and(|from| start >= from) {
        return Err("500 Internal Server Error");
    }
    let session = state.sessions.get_mut(id).ok_or("404 Not Found")?;
    if session.parts.is_some() {
        return Err("403 Forbidden");
    }
    if session.busy {
        return Err("423 Locked");
    }
    if start != session.data.len() {
        return Err("409 Conflict");
    }
    if start + req.body.len() > session.length {
        return Err("413 Payload Too Large");
    }
    session.busy = true;
    Ok(())
}

fn finish_patch(server: &TusServer, id: &str, body: &[u8]) -> usize {
    let mut state = server.state.lock().unwrap();
    match state.sessions.get_mut(id) {
        Some(session) => {
            session.data.extend_from_slice(body);
            session.busy = false;
            session.data.len()
        }
        None => 0,
    }
}
