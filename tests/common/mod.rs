//! Shared test fixtures: a minimal loopback HTTP stub that records every
//! request it receives and answers from a static route table.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// One request as seen on the wire.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    /// Path portion of the request target; absolute-form targets (as sent
    /// to a proxy) are reduced to their path.
    pub path: String,
    /// The raw request target, absolute form included.
    pub target: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Canned response for one path prefix.
#[derive(Debug, Clone)]
pub struct Route {
    pub path_prefix: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl Route {
    pub fn new(path_prefix: &str, status: u16, content_type: &str, body: &str) -> Self {
        Route {
            path_prefix: path_prefix.into(),
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

pub struct HttpStub {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl HttpStub {
    /// Bind a loopback listener and serve `routes` until the test ends.
    pub async fn start(routes: Vec<Route>) -> HttpStub {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let requests: Arc<Mutex<Vec<StubRequest>>> = Arc::default();

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, routes, recorded).await;
                });
            }
        });

        HttpStub { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn hits(&self, path_prefix: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.path.starts_with(path_prefix))
            .count()
    }
}

async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    routes: Vec<Route>,
    recorded: Arc<Mutex<Vec<StubRequest>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    // read the head
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > 1 << 20 {
            return Ok(());
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    // read the body when one is declared
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body_bytes = buf[head_end + 4..].to_vec();
    while body_bytes.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_bytes.extend_from_slice(&chunk[..n]);
    }

    let path = path_of(&target);
    recorded.lock().await.push(StubRequest {
        method,
        path: path.clone(),
        target,
        headers,
        body: String::from_utf8_lossy(&body_bytes).into_owned(),
    });

    let route = routes
        .iter()
        .find(|r| path.starts_with(&r.path_prefix))
        .cloned()
        .unwrap_or_else(|| Route::new("/", 404, "text/plain", "not found"));

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        route.status,
        reason(route.status),
        route.content_type,
        route.body.len(),
        route.body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reduce a request target to its path; proxies receive absolute form.
fn path_of(target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    if let Some(scheme_end) = target.find("://") {
        let rest = &target[scheme_end + 3..];
        if let Some(slash) = rest.find('/') {
            return rest[slash..].to_string();
        }
        return "/".to_string();
    }
    target.to_string()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
