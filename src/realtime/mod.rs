//! Realtime Connection Module
//!
//! One persistent socket per session, multiplexing request/reply
//! conversations and server pushes.
//!
//! # Architecture
//!
//! | Module      | Responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | `protocol`  | Envelope model, JSON wire format                      |
//! | `transport` | WebSocket dial/read/write/close, heartbeat            |
//! | `handlers`  | Push handler table, fixed before the reader starts    |
//! | `client`    | Reader loop, correlation table, request operations    |
//!
//! # Usage
//!
//! ```ignore
//! use nakama_realtime::realtime::{EventHandlers, RealtimeClient};
//!
//! let socket = session.connect(&config.socket_endpoint(), true).await?;
//! let handlers = EventHandlers::new()
//!     .on_match_data(|data| println!("op {} from {}", data.op_code, data.match_id))
//!     .on_exit(|err| eprintln!("socket gone: {:?}", err));
//!
//! let client = RealtimeClient::new(socket, handlers);
//! client.start();
//! client.start_heartbeat(Duration::from_secs(10));
//!
//! let created = client.create_match("arena").await?;
//! ```

pub mod client;
pub mod handlers;
pub mod protocol;
pub mod transport;

pub use client::{ClientState, JoinChatOptions, MatchTarget, RealtimeClient};
pub use handlers::EventHandlers;
pub use protocol::{Envelope, EventKind, Message};
pub use transport::{Socket, SocketEndpoint};
