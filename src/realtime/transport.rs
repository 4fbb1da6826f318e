//! WebSocket Transport Layer
//!
//! Single responsibility: one live realtime socket that reads and writes
//! whole envelopes. No knowledge of correlation tables or push handlers.
//!
//! Writes are serialised through a lock on the send half, so two concurrent
//! callers never interleave partial frames. Reads filter keep-alive replies
//! before anything above this layer can see them.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message as WsMessage, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{decode_envelope, encode_envelope, Envelope, Message, Ping};
use crate::error::{ClientError, Result};

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Where a socket dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoint {
    /// Server address as `host:port`
    pub host: String,
    /// `wss` when set, `ws` otherwise
    pub secure: bool,
    /// Language code announced to the server
    pub lang: String,
}

impl SocketEndpoint {
    /// Build the dial URL. The token rides in the query string.
    pub fn url(&self, token: &str, status: bool) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{}://{}/ws", scheme, self.host))
            .map_err(|e| ClientError::DialFailure(format!("Invalid endpoint {}: {}", self.host, e)))?;
        url.query_pairs_mut()
            .append_pair("lang", &self.lang)
            .append_pair("status", if status { "true" } else { "false" })
            .append_pair("token", token);
        Ok(url)
    }
}

/// A connected realtime socket.
///
/// Can only be constructed via `Socket::dial()`. Once closed it stays closed:
/// every later `read` and `write` fails with `TransportClosed`.
pub struct Socket {
    sink: Mutex<WsSink>,
    stream: Mutex<WsStream>,
    /// Flipped to `true` exactly once, by `close()` or by a close frame
    closed: watch::Sender<bool>,
    /// Set once the send half has been closed, which may happen after
    /// `closed` flips when the peer hung up first
    sink_closed: AtomicBool,
    /// Last correlation id handed out
    cid_counter: AtomicU64,
}

impl Socket {
    /// Dial the realtime endpoint.
    ///
    /// `token` must be a current access token; `status` asks the server to
    /// publish this session's presence to followers.
    pub async fn dial(endpoint: &SocketEndpoint, token: &str, status: bool) -> Result<Self> {
        let url = endpoint.url(token, status)?;
        debug!(host = %endpoint.host, secure = endpoint.secure, "Dialing realtime socket");

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::DialFailure(e.to_string()))?;

        let (sink, stream) = ws.split();
        let (closed, _) = watch::channel(false);

        info!(host = %endpoint.host, status = status, "Realtime socket connected");
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed,
            sink_closed: AtomicBool::new(false),
            cid_counter: AtomicU64::new(0),
        })
    }

    /// Next correlation id for this connection: "1", "2", ...
    pub fn next_cid(&self) -> String {
        (self.cid_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Send one envelope as a single text frame.
    ///
    /// Assigns a fresh correlation id if the envelope has none.
    pub async fn write(&self, envelope: &mut Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::TransportClosed);
        }
        if envelope.correlation_id().is_none() {
            envelope.cid = Some(self.next_cid());
        }
        let text = encode_envelope(envelope)?;

        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            return Err(ClientError::TransportClosed);
        }
        sink.send(WsMessage::Text(text)).await.map_err(map_ws_error)
    }

    /// Wait for the next application envelope.
    ///
    /// Pong replies are consumed here and never returned.
    pub async fn read(&self) -> Result<Envelope> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(ClientError::TransportClosed);
        }

        let mut stream = self.stream.lock().await;
        loop {
            let frame = tokio::select! {
                _ = wait_closed(&mut closed) => return Err(ClientError::TransportClosed),
                frame = stream.next() => frame,
            };

            let envelope = match frame {
                Some(Ok(WsMessage::Text(text))) => decode_envelope(&text)?,
                Some(Ok(WsMessage::Binary(data))) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| ClientError::WebSocket(format!("Binary frame is not UTF-8: {}", e)))?;
                    decode_envelope(text)?
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(frame = ?frame, "Server closed realtime socket");
                    self.closed.send_replace(true);
                    return Err(ClientError::TransportClosed);
                }
                // Control frames are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => {
                    self.closed.send_replace(true);
                    return Err(ClientError::TransportClosed);
                }
            };

            if envelope.is_pong() {
                debug!(cid = ?envelope.cid, "Heartbeat acknowledged");
                continue;
            }
            return Ok(envelope);
        }
    }

    /// Close the connection. Safe to call more than once and from any task.
    ///
    /// Also completes the closing handshake when the peer closed first, so
    /// the queued close reply is flushed.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        if self.sink_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Error while closing realtime socket");
        }
        info!("Realtime socket closed");
    }

    /// Write a ping every `interval` until the socket closes or a write
    /// fails. Failures are left for the reader to observe.
    ///
    /// A zero interval starts nothing and returns `None`.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            warn!("Heartbeat interval is zero, not starting heartbeat");
            return None;
        }
        let socket = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut closed = socket.closed.subscribe();
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = wait_closed(&mut closed) => break,
                    _ = ticker.tick() => {
                        let mut ping = Envelope::new(Message::Ping(Ping {}));
                        if let Err(e) = socket.write(&mut ping).await {
                            debug!(error = %e, "Heartbeat stopped");
                            break;
                        }
                        debug!(cid = ?ping.cid, "Heartbeat sent");
                    }
                }
            }
        }))
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("closed", &self.is_closed())
            .field("cid_counter", &self.cid_counter.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Resolve once the closed flag is set. The borrow taken by `wait_for` is
/// released before returning so callers stay `Send`.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn map_ws_error(err: WsError) -> ClientError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ClientError::TransportClosed,
        other => ClientError::WebSocket(other.to_string()),
    }
}
