//! Minimal HTTP/1.1 server for release API and download tests.
//!
//! Serves fixed bodies by request path and answers everything else with 404. Each
//! response closes its connection.

use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type Routes = Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>;

pub struct StaticServer {
    addr: SocketAddr,
    routes: Routes,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl StaticServer {
    /// Bind to an ephemeral port on localhost and start serving.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let routes: Routes = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        let (task_routes, task_requests) = (routes.clone(), requests.clone());
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (routes, requests) = (task_routes.clone(), task_requests.clone());
                tokio::spawn(async move {
                    let _ = serve(stream, routes, requests).await;
                });
            }
        });

        Ok(Self {
            addr,
            routes,
            requests,
            handle,
        })
    }

    /// Serve `body` as a binary download at `path`.
    #[must_use]
    pub fn with_file(self, path: &str, body: Vec<u8>) -> Self {
        self.insert(path, "application/zip", body);
        self
    }

    /// Serve `value` as JSON at `path`.
    #[must_use]
    pub fn with_json(self, path: &str, value: &serde_json::Value) -> Self {
        self.insert(path, "application/json", value.to_string().into_bytes());
        self
    }

    fn insert(&self, path: &str, content_type: &str, body: Vec<u8>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(path.to_string(), (content_type.to_string(), body));
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:49152`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Paths requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, routes: Routes, requests: Arc<Mutex<Vec<String>>>) -> Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let request = String::from_utf8_lossy(&buffer);
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
    if let Ok(mut requests) = requests.lock() {
        requests.push(path.clone());
    }

    let route = routes.lock().ok().and_then(|routes| routes.get(&path).cloned());
    let (status, content_type, body) = match route {
        Some((content_type, body)) => ("200 OK", content_type, body),
        None => ("404 Not Found", "application/json".to_string(), br#"{"message":"Not Found"}"#.to_vec()),
    };

    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}
