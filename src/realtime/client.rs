//! Realtime Dispatcher
//!
//! Single responsibility: turn one socket into many concurrent
//! request/reply conversations plus a fan-out of server pushes.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Watching ──stop() / read failure / cid mismatch──▶ Stopped
//!   └───────────────────────stop()────────────────────────────────────────┘
//! ```
//!
//! Exactly one reader task runs per client. For each inbound envelope it
//! either calls the push handler for that kind, or removes the pending
//! entry under the envelope's correlation id and completes it. A reply for a
//! correlation id nobody registered means the two ends disagree about the
//! conversation; the client stops and reports `CorrelationMismatch`.
//!
//! # Pending calls
//!
//! A request registers its slot before writing, then waits on it bounded by
//! the request timeout. Dropping the future cancels the wait. The slot stays
//! in the table until its reply arrives, so a late reply is consumed
//! quietly instead of tripping the mismatch check. Calls still waiting when
//! the reader exits are not completed by the reader; they end through their
//! own timeout.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handlers::EventHandlers;
use super::protocol::*;
use super::transport::Socket;
use crate::error::{ClientError, Result};

/// Unwrap the reply variant a request implies.
macro_rules! expect_reply {
    ($reply:expr, $variant:ident, $name:literal) => {
        match $reply {
            Some(Message::$variant(payload)) => Ok(payload),
            _ => Err(ClientError::UnexpectedReply { expected: $name }),
        }
    };
}

/// Default bound on how long a request waits for its reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the dispatcher is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Created, reader not started
    Idle,
    /// Reader task running
    Watching,
    /// Terminal
    Stopped,
}

/// Options for joining a chat channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinChatOptions {
    /// Keep messages in the channel history
    pub persistence: Option<bool>,
    /// Do not announce this user's presence
    pub hidden: Option<bool>,
}

/// Which match to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchTarget {
    /// A known match id
    Id(String),
    /// A token handed out by the matchmaker
    Token(String),
}

type Pending = DashMap<String, oneshot::Sender<Envelope>>;

/// State shared between the client handle and its reader task.
struct Shared {
    socket: Arc<Socket>,
    pending: Pending,
    handlers: EventHandlers,
    state: watch::Sender<ClientState>,
}

impl Shared {
    /// Route one inbound envelope.
    fn route(&self, envelope: Envelope) -> Result<()> {
        if let Some(kind) = envelope.push_kind() {
            debug!(kind = ?kind, "Push received");
            if let Some(message) = envelope.message {
                self.handlers.dispatch(message);
            }
            return Ok(());
        }

        let cid = envelope.correlation_id().unwrap_or_default().to_string();
        match self.pending.remove(&cid) {
            Some((_, slot)) => {
                debug!(cid = %cid, "Reply received");
                if slot.send(envelope).is_err() {
                    debug!(cid = %cid, "Reply arrived after its caller stopped waiting");
                }
                Ok(())
            }
            None => {
                warn!(cid = %cid, "Reply for unknown correlation id");
                Err(ClientError::CorrelationMismatch { cid })
            }
        }
    }

    /// Move to `Stopped`, close the socket and fire the exit notification.
    ///
    /// Returns false if the client had already stopped.
    async fn halt(&self, err: Option<ClientError>) -> bool {
        let stopped = self.state.send_if_modified(|state| {
            if *state == ClientState::Stopped {
                false
            } else {
                *state = ClientState::Stopped;
                true
            }
        });
        if !stopped {
            return false;
        }

        self.socket.close().await;
        match &err {
            Some(e) => error!(error = %e, "Realtime client stopped"),
            None => info!("Realtime client stopped"),
        }
        self.handlers.exit(err);
        true
    }
}

/// Multiplexed realtime client over one socket.
pub struct RealtimeClient {
    shared: Arc<Shared>,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    /// Wrap a connected socket. The handler table is fixed from here on.
    pub fn new(socket: Socket, handlers: EventHandlers) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        Self {
            shared: Arc::new(Shared {
                socket: Arc::new(socket),
                pending: DashMap::new(),
                handlers,
                state,
            }),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reader: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Launch the reader task. Only the first call on an idle client does
    /// anything.
    pub fn start(&self) {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == ClientState::Idle {
                *state = ClientState::Watching;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(reader_loop(shared));
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }
        info!("Realtime client started");
    }

    /// Keep the connection alive with a ping every `interval`.
    ///
    /// The heartbeat ends together with the socket. Returns `false`, leaving
    /// any running heartbeat in place, when `interval` is zero.
    pub fn start_heartbeat(&self, interval: Duration) -> bool {
        let Some(handle) = self.shared.socket.start_heartbeat(interval) else {
            return false;
        };
        if let Ok(mut heartbeat) = self.heartbeat.lock() {
            if let Some(previous) = heartbeat.replace(handle) {
                previous.abort();
            }
        }
        true
    }

    /// Stop the client and close its socket. The exit notification fires
    /// with `None` unless the client had already stopped.
    pub async fn stop(&self) {
        self.shared.halt(None).await;
        if let Ok(mut heartbeat) = self.heartbeat.lock() {
            if let Some(handle) = heartbeat.take() {
                handle.abort();
            }
        }
    }

    /// Resolves once the client has reached `Stopped`.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|state| *state == ClientState::Stopped).await;
    }

    /// Number of requests still registered in the pending table.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Send a request and wait for the envelope answering it.
    ///
    /// Returns the reply payload, or `None` for a bare acknowledgement. An
    /// error envelope comes back as `ClientError::Realtime`.
    pub async fn send_for_response(&self, message: Message) -> Result<Option<Message>> {
        let socket = &self.shared.socket;
        let cid = socket.next_cid();
        let (slot, reply) = oneshot::channel();
        self.shared.pending.insert(cid.clone(), slot);

        let mut envelope = Envelope::new(message).with_cid(cid.clone());
        if let Err(e) = socket.write(&mut envelope).await {
            self.shared.pending.remove(&cid);
            return Err(e);
        }
        debug!(cid = %cid, "Request sent");

        let reply = match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ClientError::TransportClosed),
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "no reply for cid {} within {:?}",
                    cid, self.request_timeout
                )))
            }
        };

        match reply.message {
            Some(Message::Error(payload)) => Err(ClientError::Realtime(payload.into())),
            other => Ok(other),
        }
    }

    /// Write without registering for a reply.
    async fn send(&self, message: Message) -> Result<()> {
        self.shared.socket.write(&mut Envelope::new(message)).await
    }

    // ─── matchmaking ────────────────────────────────────────────────────────

    pub async fn add_matchmaker(&self, request: MatchmakerAdd) -> Result<MatchmakerTicket> {
        let reply = self.send_for_response(Message::MatchmakerAdd(request)).await?;
        expect_reply!(reply, MatchmakerTicket, "matchmaker_ticket")
    }

    pub async fn add_matchmaker_party(
        &self,
        party_id: &str,
        request: MatchmakerAdd,
    ) -> Result<PartyMatchmakerTicket> {
        let message = Message::PartyMatchmakerAdd(PartyMatchmakerAdd {
            party_id: party_id.to_string(),
            min_count: request.min_count,
            max_count: request.max_count,
            query: request.query,
            string_properties: request.string_properties,
            numeric_properties: request.numeric_properties,
        });
        let reply = self.send_for_response(message).await?;
        expect_reply!(reply, PartyMatchmakerTicket, "party_matchmaker_ticket")
    }

    pub async fn remove_matchmaker(&self, ticket: &str) -> Result<()> {
        self.send_for_response(Message::MatchmakerRemove(MatchmakerRemove {
            ticket: ticket.to_string(),
        }))
        .await?;
        Ok(())
    }

    pub async fn remove_matchmaker_party(&self, party_id: &str, ticket: &str) -> Result<()> {
        self.send_for_response(Message::PartyMatchmakerRemove(PartyMatchmakerRemove {
            party_id: party_id.to_string(),
            ticket: ticket.to_string(),
        }))
        .await?;
        Ok(())
    }

    // ─── matches ────────────────────────────────────────────────────────────

    pub async fn create_match(&self, name: &str) -> Result<Match> {
        let reply = self
            .send_for_response(Message::MatchCreate(MatchCreate {
                name: name.to_string(),
            }))
            .await?;
        expect_reply!(reply, Match, "match")
    }

    pub async fn join_match(
        &self,
        target: MatchTarget,
        metadata: HashMap<String, String>,
    ) -> Result<Match> {
        let (match_id, token) = match target {
            MatchTarget::Id(id) => (Some(id), None),
            MatchTarget::Token(token) => (None, Some(token)),
        };
        let reply = self
            .send_for_response(Message::MatchJoin(MatchJoin {
                match_id,
                token,
                metadata,
            }))
            .await?;
        expect_reply!(reply, Match, "match")
    }

    pub async fn leave_match(&self, match_id: &str) -> Result<()> {
        self.send_for_response(Message::MatchLeave(MatchLeave {
            match_id: match_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    /// Fire-and-forget match state. An empty `presences` targets everyone.
    pub async fn send_match_state(
        &self,
        match_id: &str,
        op_code: i64,
        data: Vec<u8>,
        presences: Vec<UserPresence>,
        reliable: bool,
    ) -> Result<()> {
        self.send(Message::MatchDataSend(MatchDataSend {
            match_id: match_id.to_string(),
            op_code,
            data,
            presences,
            reliable,
        }))
        .await
    }

    // ─── parties ────────────────────────────────────────────────────────────

    pub async fn create_party(&self, open: bool, max_size: i32) -> Result<Party> {
        let reply = self
            .send_for_response(Message::PartyCreate(PartyCreate { open, max_size }))
            .await?;
        expect_reply!(reply, Party, "party")
    }

    pub async fn join_party(&self, party_id: &str) -> Result<()> {
        self.send_for_response(Message::PartyJoin(PartyJoin {
            party_id: party_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    pub async fn leave_party(&self, party_id: &str) -> Result<()> {
        self.send_for_response(Message::PartyLeave(PartyLeave {
            party_id: party_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    pub async fn close_party(&self, party_id: &str) -> Result<()> {
        self.send_for_response(Message::PartyClose(PartyClose {
            party_id: party_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    /// Accept a join request. Fire-and-forget.
    pub async fn accept_party_member(&self, party_id: &str, presence: UserPresence) -> Result<()> {
        self.send(Message::PartyAccept(PartyAccept {
            party_id: party_id.to_string(),
            presence: Some(presence),
        }))
        .await
    }

    pub async fn remove_party_member(&self, party_id: &str, presence: UserPresence) -> Result<()> {
        self.send_for_response(Message::PartyRemove(PartyRemove {
            party_id: party_id.to_string(),
            presence: Some(presence),
        }))
        .await?;
        Ok(())
    }

    pub async fn promote_party_member(
        &self,
        party_id: &str,
        presence: UserPresence,
    ) -> Result<PartyLeader> {
        let reply = self
            .send_for_response(Message::PartyPromote(PartyPromote {
                party_id: party_id.to_string(),
                presence: Some(presence),
            }))
            .await?;
        expect_reply!(reply, PartyLeader, "party_leader")
    }

    pub async fn list_party_join_requests(&self, party_id: &str) -> Result<PartyJoinRequest> {
        let reply = self
            .send_for_response(Message::PartyJoinRequestList(PartyJoinRequestList {
                party_id: party_id.to_string(),
            }))
            .await?;
        expect_reply!(reply, PartyJoinRequest, "party_join_request")
    }

    /// Fire-and-forget party data.
    pub async fn send_party_data(&self, party_id: &str, op_code: i64, data: Vec<u8>) -> Result<()> {
        self.send(Message::PartyDataSend(PartyDataSend {
            party_id: party_id.to_string(),
            op_code,
            data,
        }))
        .await
    }

    // ─── status ─────────────────────────────────────────────────────────────

    pub async fn follow_users(&self, user_ids: Vec<String>, usernames: Vec<String>) -> Result<Status> {
        let reply = self
            .send_for_response(Message::StatusFollow(StatusFollow { user_ids, usernames }))
            .await?;
        expect_reply!(reply, Status, "status")
    }

    pub async fn unfollow_users(&self, user_ids: Vec<String>) -> Result<()> {
        self.send_for_response(Message::StatusUnfollow(StatusUnfollow { user_ids }))
            .await?;
        Ok(())
    }

    /// Set the status shown to followers; `None` appears offline.
    pub async fn update_status(&self, status: Option<String>) -> Result<()> {
        self.send_for_response(Message::StatusUpdate(StatusUpdate { status }))
            .await?;
        Ok(())
    }

    // ─── chat ───────────────────────────────────────────────────────────────

    pub async fn join_chat(
        &self,
        target: &str,
        channel_type: ChannelType,
        options: JoinChatOptions,
    ) -> Result<Channel> {
        let reply = self
            .send_for_response(Message::ChannelJoin(ChannelJoin {
                target: target.to_string(),
                channel_type: channel_type as i32,
                persistence: options.persistence,
                hidden: options.hidden,
            }))
            .await?;
        expect_reply!(reply, Channel, "channel")
    }

    pub async fn leave_chat(&self, channel_id: &str) -> Result<()> {
        self.send_for_response(Message::ChannelLeave(ChannelLeave {
            channel_id: channel_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    /// `content` must be a JSON object encoded as a string.
    pub async fn write_chat_message(&self, channel_id: &str, content: &str) -> Result<ChannelMessageAck> {
        let reply = self
            .send_for_response(Message::ChannelMessageSend(ChannelMessageSend {
                channel_id: channel_id.to_string(),
                content: content.to_string(),
            }))
            .await?;
        expect_reply!(reply, ChannelMessageAck, "channel_message_ack")
    }

    pub async fn update_chat_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ChannelMessageAck> {
        let reply = self
            .send_for_response(Message::ChannelMessageUpdate(ChannelMessageUpdate {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                content: content.to_string(),
            }))
            .await?;
        expect_reply!(reply, ChannelMessageAck, "channel_message_ack")
    }

    pub async fn remove_chat_message(&self, channel_id: &str, message_id: &str) -> Result<ChannelMessageAck> {
        let reply = self
            .send_for_response(Message::ChannelMessageRemove(ChannelMessageRemove {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
            }))
            .await?;
        expect_reply!(reply, ChannelMessageAck, "channel_message_ack")
    }

    // ─── rpc ────────────────────────────────────────────────────────────────

    /// Call a server function over the socket. `http_key` may be empty.
    pub async fn rpc(&self, id: &str, payload: &str, http_key: &str) -> Result<Rpc> {
        let reply = self
            .send_for_response(Message::Rpc(Rpc {
                id: id.to_string(),
                payload: payload.to_string(),
                http_key: http_key.to_string(),
            }))
            .await?;
        expect_reply!(reply, Rpc, "rpc")
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for task in [&self.reader, &self.heartbeat] {
            if let Some(handle) = task.lock().ok().and_then(|mut task| task.take()) {
                handle.abort();
            }
        }
        debug!("Realtime client dropped, tasks aborted");
    }
}

/// Reader loop, runs in a spawned task until the client stops.
async fn reader_loop(shared: Arc<Shared>) {
    debug!("Reader loop started");

    loop {
        let result = match shared.socket.read().await {
            Ok(envelope) => shared.route(envelope),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            shared.halt(Some(e)).await;
            break;
        }
    }

    debug!(pending = shared.pending.len(), "Reader loop ended");
}
