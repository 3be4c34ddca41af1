//! Transport seam between the connection task and the network.
//!
//! [`WsTransport`] speaks WebSocket over TCP (TLS for `wss://`). Tests swap in a
//! scripted transport so the lifecycle can be driven without sockets.

use crate::error::Error;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio_tungstenite::{
    client_async_tls_with_config, tungstenite::client::IntoClientRequest, tungstenite::Message,
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};
use url::Url;

/// One inbound unit from a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame (an event envelope)
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// Reply to a keepalive ping
    Pong,
    /// The server is closing the stream, with its reason if it gave one
    Close(Option<String>),
}

/// Opens sessions to the event stream.
///
/// Implementations must be cheap to share; the manager holds one instance for
/// its whole life and calls `open` once per connection attempt.
pub trait Transport: Send + Sync + 'static {
    /// The live connection produced by `open`
    type Session: Session;

    /// Open a session to `url`.
    ///
    /// The caller applies the connect timeout; implementations need not.
    fn open(&self, url: &Url) -> impl Future<Output = Result<Self::Session, Error>> + Send;
}

/// A live, bidirectional connection
pub trait Session: Send + 'static {
    /// Wait for the next frame. `None` means the stream ended.
    ///
    /// Must be cancel safe: the connection task races it against shutdown
    /// and the keepalive timer.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Frame, Error>>> + Send;

    /// Send a keepalive ping
    fn ping(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Close the session, ignoring errors
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Type alias for WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over TCP, with native TLS for `wss://`
#[derive(Debug, Clone)]
pub struct WsTransport {
    /// TCP keepalive idle time; `None` leaves the OS default
    pub tcp_keepalive: Option<Duration>,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self {
            tcp_keepalive: Some(Duration::from_secs(30)),
        }
    }
}

impl Transport for WsTransport {
    type Session = WsSession;

    async fn open(&self, url: &Url) -> Result<WsSession, Error> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::ConnectionFailed("No host in URL".to_string()))?;

        let is_tls = url.scheme() == "wss";
        let port = url.port_or_known_default().unwrap_or(if is_tls { 443 } else { 80 });

        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::ConnectionFailed(format!("Invalid WebSocket request: {}", e)))?;

        debug!("[WS-EVENTS] Connecting to {}", url);
        let tcp_stream = connect_direct(host, port).await?;
        set_tcp_options(&tcp_stream, self.tcp_keepalive);

        let connector = if is_tls {
            let tls = native_tls::TlsConnector::new()
                .map_err(|e| Error::ConnectionFailed(format!("TLS error: {}", e)))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (stream, _response) =
            client_async_tls_with_config(request, tcp_stream, None, connector).await?;

        Ok(WsSession { stream })
    }
}

/// Live WebSocket session
pub struct WsSession {
    stream: WsStream,
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession").finish_non_exhaustive()
    }
}

impl Session for WsSession {
    async fn recv(&mut self) -> Option<Result<Frame, Error>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::WebSocket(e))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Binary(data) => return Some(Ok(Frame::Binary(data))),
                Message::Pong(_) => return Some(Ok(Frame::Pong)),
                Message::Close(frame) => {
                    return Some(Ok(Frame::Close(
                        frame
                            .map(|f| f.reason.into_owned())
                            .filter(|reason| !reason.is_empty()),
                    )))
                }
                Message::Ping(data) => {
                    trace!("[WS-EVENTS] Received ping, sending pong");
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(Error::WebSocket(e)));
                    }
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn ping(&mut self) -> Result<(), Error> {
        self.stream.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!("[WS-EVENTS] Close handshake failed: {}", e);
        }
    }
}

/// Resolve `host` and open a TCP connection to the first address
async fn connect_direct(host: &str, port: u16) -> Result<TcpStream, Error> {
    let dest_addr: SocketAddr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::ConnectionFailed(format!("DNS lookup failed: {}", e)))?
        .next()
        .ok_or_else(|| Error::ConnectionFailed(format!("No addresses found for {}", host)))?;

    let socket = if dest_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| Error::ConnectionFailed(format!("Failed to create socket: {}", e)))?;

    socket.connect(dest_addr).await.map_err(|e| {
        Error::ConnectionFailed(format!("TCP connect to {} failed: {}", dest_addr, e))
    })
}

/// Disable Nagle and enable TCP keepalive
fn set_tcp_options(stream: &TcpStream, keepalive: Option<Duration>) {
    let sock = socket2::SockRef::from(stream);

    let _ = sock.set_nodelay(true);

    if let Some(idle) = keepalive {
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(idle)
            .with_interval(Duration::from_secs(10));
        let _ = sock.set_tcp_keepalive(&keepalive);
    }
}
