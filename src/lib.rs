//! Nakama Realtime - session, socket and realtime dispatcher for Nakama game servers
//!
//! ## Architecture
//!
//! - **Session**: owns the access/refresh token pair and refreshes it on demand
//! - **Socket**: one WebSocket per session, framed JSON envelopes, heartbeat
//! - **RealtimeClient**: correlates replies with requests and fans out pushes
//!
//! ```text
//! Client ──authenticate──▶ Session ──connect──▶ Socket ──▶ RealtimeClient
//!   │                        │                               ├─ reader task
//!   └──── UnaryApi (HTTP) ◀──┘ refresh / logout / rpc         └─ heartbeat task
//! ```
//!
//! Everything that is not realtime (authenticate, refresh, rpc) goes through
//! the `UnaryApi` trait, implemented over the REST gateway by `HttpApi`.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod token;

// Re-exports
pub use api::{HttpApi, UnaryApi};
pub use client::{AuthenticateOptions, Client};
pub use config::ClientConfig;
pub use error::{ClientError, RealtimeError, Result};
pub use realtime::{EventHandlers, RealtimeClient, Socket, SocketEndpoint};
pub use session::Session;
