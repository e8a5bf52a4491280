
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::{HttpBackend, HttpClientConfig};

#[derive(Clone, Debug)]
pub(crate) struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone)]
pub(crate) struct Reply {
    pub status: u16,
    pub body: String,
    pub set_cookie: Option<String>,
}

pub(crate) fn reply(status: u16, body: serde_json::Value) -> Reply {
    Reply {
        status,
        body: body.to_string(),
        set_cookie: None,
    }
}

/// Minimal HTTP/1.1 responder: one request per connection, routes keyed by
/// `"METHOD /path"`, everything else 404.
pub(crate) struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

pub(crate) async fn spawn_stub(routes: Vec<(&str, Reply)>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let routes: Arc<HashMap<String, Reply>> = Arc::new(
        routes
            .into_iter()
            .map(|(key, reply)| (key.to_string(), reply))
            .collect(),
    );
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();
    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let routes = routes.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let _ = serve_one(socket, routes, recorded).await;
            });
        }
    });
    StubServer {
        base_url: format!("http://{}", addr),
        requests,
        handle,
    }
}

async fn serve_one(
    mut socket: TcpStream,
    routes: Arc<HashMap<String, Reply>>,
    recorded: Arc<Mutex<Vec<Recorded>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let length: usize = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (head_end + length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[head_end..end]).to_string();

    let reply = routes
        .get(&format!("{} {}", method, path))
        .cloned()
        .unwrap_or_else(|| reply(404, serde_json::json!({ "message": "not found" })));
    recorded.lock().unwrap().push(Recorded {
        method,
        path,
        headers,
        body,
    });

    let mut response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    if let Some(cookie) = reply.set_cookie.as_ref() {
        response.push_str(&format!("Set-Cookie: {}\r\n", cookie));
    }
    response.push_str("\r\n");
    response.push_str(&reply.body);
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

pub(crate) fn backend_for(base_url: &str) -> HttpBackend {
    HttpBackend::new(base_url.to_string(), HttpClientConfig::default()).expect("backend")
}

pub(crate) fn identity_json(id: &str, label: &str) -> serde_json::Value {
    serde_json::json!({
        "_id": id,
        "anonymousId": label,
        "displayName": label,
        "profilePic": "",
        "createdAt": "2024-05-01T10:00:00.000Z",
        "__v": 0
    })
}

/// Single-connection socket.io server. Sends the engine.io open packet,
/// acknowledges the namespace connect, pings once and, after the pong,
/// plays `script`.
pub(crate) struct SocketIoServer {
    pub base_url: String,
    pub cookie: oneshot::Receiver<Option<String>>,
    pub received: mpsc::UnboundedReceiver<String>,
}

pub(crate) async fn spawn_socket_io(script: Vec<String>, close_after_script: bool) -> SocketIoServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (cookie_tx, cookie_rx) = oneshot::channel();
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let cookie = req
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = cookie_tx.send(cookie);
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback)
            .await
            .expect("ws accept");
        ws.send(Message::text(
            r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
        ))
        .await
        .expect("open packet");
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let text = text.as_str().to_string();
            let _ = received_tx.send(text.clone());
            match text.as_str() {
                "40" => {
                    let _ = ws.send(Message::text(r#"40{"sid":"n1"}"#)).await;
                    let _ = ws.send(Message::text("2")).await;
                }
                "3" => {
                    for frame in &script {
                        let _ = ws.send(Message::text(frame.clone())).await;
                    }
                    if close_after_script {
                        let _ = ws.close(None).await;
                    }
                }
                "41" => break,
                _ => {}
            }
        }
    });
    SocketIoServer {
        base_url: format!("http://{}", addr),
        cookie: cookie_rx,
        received: received_rx,
    }
}
