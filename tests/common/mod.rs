//! Shared helpers: an in-process realtime server and token minting.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use nakama_realtime::SocketEndpoint;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// Far enough in the future for any test run
pub const FUTURE: i64 = 4_000_000_000;

/// Mint an HS256 token the way the server does.
pub fn mint(claims: Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret-that-is-at-least-32-characters-long"),
    )
    .unwrap()
}

enum Action {
    Send(String),
    Close,
    /// Send a close frame and report whether the client answered with one
    CloseAndAwaitReply(oneshot::Sender<bool>),
}

/// A one-connection realtime server driven by the test.
pub struct MockServer {
    pub endpoint: SocketEndpoint,
    frames: mpsc::UnboundedReceiver<Value>,
    actions: mpsc::UnboundedSender<Action>,
    request_uri: Arc<Mutex<Option<String>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (frames_tx, frames) = mpsc::unbounded_channel::<Value>();
        let (actions, mut actions_rx) = mpsc::unbounded_channel::<Action>();
        let request_uri = Arc::new(Mutex::new(None));
        let seen_uri = Arc::clone(&request_uri);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *seen_uri.lock().unwrap() = Some(request.uri().to_string());
                Ok(response)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
            let (mut sink, mut stream) = ws.split();

            loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            let _ = frames_tx.send(serde_json::from_str(&text).unwrap());
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    action = actions_rx.recv() => match action {
                        Some(Action::Send(text)) => {
                            if sink.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(Action::CloseAndAwaitReply(reply)) => {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            let answered = tokio::time::timeout(Duration::from_secs(5), async {
                                while let Some(frame) = stream.next().await {
                                    match frame {
                                        Ok(WsMessage::Close(_)) => return true,
                                        Ok(_) => continue,
                                        Err(_) => return false,
                                    }
                                }
                                false
                            })
                            .await
                            .unwrap_or(false);
                            let _ = reply.send(answered);
                            break;
                        }
                        Some(Action::Close) | None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Self {
            endpoint: SocketEndpoint {
                host: addr.to_string(),
                secure: false,
                lang: "en".into(),
            },
            frames,
            actions,
            request_uri,
        }
    }

    /// Next frame the client wrote, as JSON.
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("no frame from client within 5s")
            .expect("server task ended")
    }

    pub fn send(&self, value: Value) {
        let _ = self.actions.send(Action::Send(value.to_string()));
    }

    pub fn close(&self) {
        let _ = self.actions.send(Action::Close);
    }

    /// Close from the server side and wait for the client's close reply.
    pub async fn close_and_await_reply(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        let _ = self.actions.send(Action::CloseAndAwaitReply(tx));
        rx.await.unwrap_or(false)
    }

    /// URI of the upgrade request, once a client has connected.
    pub fn request_uri(&self) -> Option<String> {
        self.request_uri.lock().unwrap().clone()
    }
}

/// The correlation id of a frame the client wrote.
pub fn cid(frame: &Value) -> String {
    frame["cid"].as_str().expect("frame without cid").to_string()
}
