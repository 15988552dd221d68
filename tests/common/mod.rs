//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request as a mock backend saw it.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    /// Path plus query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub async fn bind_local() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = bind_local().await;
    listener.local_addr().unwrap()
}

/// Answer every connection on `listener` with `handler`'s (status, body).
pub fn serve<F>(listener: TcpListener, handler: F)
where
    F: Fn(MockRequest) -> (u16, String) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = handler(request);
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a programmable mock backend and return its address.
pub async fn start_programmable_backend<F>(handler: F) -> SocketAddr
where
    F: Fn(MockRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = bind_local().await;
    let addr = listener.local_addr().unwrap();
    serve(listener, handler);
    addr
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(header_end + length);
    let body = String::from_utf8_lossy(&buf[header_end..end]).to_string();

    Some(MockRequest { method, path, headers, body })
}

/// A fake query-engine cluster.
///
/// Serves cluster stats on both stats paths, accepts statements, and answers
/// each query in two continuation steps (`.../t/1` then a final `.../t/2`).
/// A failing engine answers the first step with a retryable error instead.
pub struct MockEngine {
    pub name: &'static str,
    pub addr: SocketAddr,
    queued: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
    submissions: Arc<Mutex<Vec<(String, MockRequest)>>>,
}

impl MockEngine {
    pub async fn start(name: &'static str, queued: u32) -> Self {
        Self::launch(name, queued, false).await
    }

    pub async fn start_failing(name: &'static str, queued: u32) -> Self {
        Self::launch(name, queued, true).await
    }

    async fn launch(name: &'static str, queued: u32, failing: bool) -> Self {
        let listener = bind_local().await;
        let addr = listener.local_addr().unwrap();
        let queued = Arc::new(AtomicU32::new(queued));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let submissions = Arc::new(Mutex::new(Vec::new()));
        let submitted = Arc::new(AtomicU32::new(0));

        {
            let queued = queued.clone();
            let requests = requests.clone();
            let submissions = submissions.clone();
            serve(listener, move |request| {
                requests.lock().unwrap().push(request.clone());
                let (status, body) = engine_response(name, addr, failing, &queued, &submitted, &request);
                if request.method == "POST" && request.path == "/v1/statement" {
                    let id = serde_json::from_str::<serde_json::Value>(&body).unwrap()["id"]
                        .as_str()
                        .unwrap()
                        .to_string();
                    submissions.lock().unwrap().push((id, request.clone()));
                }
                (status, body)
            });
        }

        Self { name, addr, queued, requests, submissions }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_queued(&self, queued: u32) {
        self.queued.store(queued, Ordering::SeqCst);
    }

    /// Requests received whose path contains `needle`.
    pub fn received(&self, needle: &str) -> Vec<MockRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path.contains(needle))
            .cloned()
            .collect()
    }

    /// Accepted statements with the query id each was given.
    pub fn submissions(&self) -> Vec<(String, MockRequest)> {
        self.submissions.lock().unwrap().clone()
    }
}

fn engine_response(
    name: &str,
    addr: SocketAddr,
    failing: bool,
    queued: &AtomicU32,
    submitted: &AtomicU32,
    request: &MockRequest,
) -> (u16, String) {
    let path = request.path.as_str();
    match (request.method.as_str(), path) {
        ("GET", "/ui/api/stats") | ("GET", "/v1/cluster") => (
            200,
            format!(
                r#"{{"activeWorkers":4,"queuedQueries":{},"runningQueries":1,"blockedQueries":0}}"#,
                queued.load(Ordering::SeqCst)
            ),
        ),
        ("POST", "/v1/statement") => {
            let n = submitted.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("{name}_{n}");
            (
                200,
                format!(r#"{{"id":"{id}","nextUri":"http://{addr}/v1/statement/executing/{id}/t/1"}}"#),
            )
        }
        ("GET", p) if p.starts_with("/v1/statement/executing/") => {
            let parts: Vec<&str> = p.trim_start_matches('/').split('/').collect();
            // v1 / statement / executing / {id} / t / {n}
            let (Some(id), Some(step)) = (parts.get(3), parts.get(5).and_then(|s| s.parse::<u32>().ok())) else {
                return (404, "{}".to_string());
            };
            if failing {
                (
                    200,
                    format!(
                        r#"{{"id":"{id}","error":{{"errorCode":65558,"errorName":"REMOTE_HOST_GONE","errorType":"EXTERNAL"}}}}"#
                    ),
                )
            } else if step < 2 {
                let next = step + 1;
                (
                    200,
                    format!(r#"{{"id":"{id}","nextUri":"http://{addr}/v1/statement/executing/{id}/t/{next}"}}"#),
                )
            } else {
                (200, format!(r#"{{"id":"{id}","stats":{{"state":"FINISHED"}}}}"#))
            }
        }
        _ => (404, r#"{"error":"not found"}"#.to_string()),
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
