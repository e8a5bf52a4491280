use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use memesh_core::error::CoreError;
use memesh_core::transport::{ChannelEvent, RealtimeChannel, RealtimeConnector};
use reqwest::cookie::{CookieStore, Jar};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{MemeshClientError, Result};
use crate::frame::{self, Frame};
use crate::urls;

const EVENT_BUFFER: usize = 128;

/// Opens socket.io connections over WebSocket, presenting the session
/// cookie from the REST client's jar.
#[derive(Clone)]
pub struct SocketIoConnector {
    ws_url: String,
    cookie_origin: reqwest::Url,
    jar: Arc<Jar>,
    connect_timeout: Duration,
}

impl SocketIoConnector {
    pub fn new(
        api_base: &str,
        realtime_base: &str,
        jar: Arc<Jar>,
        connect_timeout: Duration,
    ) -> Result<SocketIoConnector> {
        let ws_url = urls::socket_io(realtime_base)?;
        let cookie_origin = reqwest::Url::parse(&urls::validated_base(api_base)?)
            .map_err(|_| MemeshClientError::InvalidBaseUrl)?;
        Ok(SocketIoConnector {
            ws_url,
            cookie_origin,
            jar,
            connect_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.ws_url
    }

    fn handshake_request(&self) -> Result<Request> {
        let mut request = self.ws_url.as_str().into_client_request()?;
        if let Some(cookies) = self.jar.cookies(&self.cookie_origin) {
            let raw = cookies
                .to_str()
                .map_err(|_| MemeshClientError::InvalidInput("cookie"))?;
            let value =
                HeaderValue::from_str(raw).map_err(|_| MemeshClientError::InvalidInput("cookie"))?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }

    async fn connect(&self) -> Result<RealtimeChannel> {
        let request = self.handshake_request()?;
        let (stream, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| MemeshClientError::Timeout)??;
        log::debug!("websocket open to {}", self.ws_url);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(drive(stream, tx, shutdown_rx));
        Ok(RealtimeChannel::new(rx, shutdown_tx))
    }
}

#[async_trait::async_trait]
impl RealtimeConnector for SocketIoConnector {
    async fn open(&self) -> std::result::Result<RealtimeChannel, CoreError> {
        self.connect().await.map_err(|err| {
            log::warn!("websocket connect failed: {}", err);
            CoreError::ConnectionLost(err.to_string())
        })
    }
}

/// Pumps frames until the socket closes, the channel is dropped, or
/// shutdown is requested.
async fn drive<S>(
    stream: WebSocketStream<S>,
    events: mpsc::Sender<ChannelEvent>,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = stream.split();
    loop {
        let incoming = tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(Message::text(frame::DISCONNECT)).await;
                let _ = write.close().await;
                return;
            }
            incoming = read.next() => incoming,
        };
        let event = match incoming {
            Some(Ok(Message::Text(text))) => match frame::decode(text.as_str()) {
                Ok(Frame::Open) => {
                    if write.send(Message::text(frame::CONNECT)).await.is_err() {
                        Some(ChannelEvent::Error("handshake write failed".to_string()))
                    } else {
                        None
                    }
                }
                Ok(Frame::Ping) => {
                    let _ = write.send(Message::text(frame::PONG)).await;
                    None
                }
                Ok(Frame::Event(event)) => Some(event),
                Ok(Frame::Ignored) => None,
                Err(err) => {
                    log::debug!("skipping frame: {}", err);
                    None
                }
            },
            Some(Ok(Message::Close(_))) | None => Some(ChannelEvent::Disconnected),
            Some(Ok(_)) => None,
            Some(Err(err)) => Some(ChannelEvent::Error(err.to_string())),
        };
        let Some(event) = event else {
            continue;
        };
        let terminal = matches!(event, ChannelEvent::Disconnected | ChannelEvent::Error(_));
        if events.send(event).await.is_err() || terminal {
            let _ = write.close().await;
            return;
        }
    }
}
