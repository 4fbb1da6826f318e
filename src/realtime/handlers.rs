//! Push Handler Table
//!
//! Built once with the `on_*` methods and handed to `RealtimeClient::new`.
//! After that it is read-only, so the reader task can dispatch without locks.

use std::sync::Mutex;
use tracing::debug;

use super::protocol::*;
use crate::error::ClientError;

type Handler<T> = Option<Box<dyn Fn(T) + Send + Sync>>;
type ExitHandler = Box<dyn FnOnce(Option<ClientError>) + Send>;

/// One optional handler per push kind, plus the exit notification.
#[derive(Default)]
pub struct EventHandlers {
    notification: Handler<Notification>,
    match_data: Handler<MatchData>,
    match_presence: Handler<MatchPresenceEvent>,
    matchmaker_ticket: Handler<MatchmakerTicket>,
    matchmaker_matched: Handler<MatchmakerMatched>,
    status_presence: Handler<StatusPresenceEvent>,
    stream_presence: Handler<StreamPresenceEvent>,
    stream_data: Handler<StreamData>,
    channel_message: Handler<ChannelMessage>,
    channel_presence: Handler<ChannelPresenceEvent>,
    party_data: Handler<PartyData>,
    party_presence: Handler<PartyPresenceEvent>,
    party_close: Handler<PartyClose>,
    party_join_request: Handler<PartyJoinRequest>,
    party_leader: Handler<PartyLeader>,
    party_matchmaker_ticket: Handler<PartyMatchmakerTicket>,
    party: Handler<Party>,
    exit: Mutex<Option<ExitHandler>>,
}

macro_rules! on_handler {
    ($(#[$doc:meta])* $method:ident, $field:ident, $payload:ty) => {
        $(#[$doc])*
        pub fn $method(mut self, handler: impl Fn($payload) + Send + Sync + 'static) -> Self {
            self.$field = Some(Box::new(handler));
            self
        }
    };
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    on_handler!(
        /// Called once per notification, even when several arrive in one frame.
        on_notification, notification, Notification
    );
    on_handler!(on_match_data, match_data, MatchData);
    on_handler!(on_match_presence, match_presence, MatchPresenceEvent);
    on_handler!(on_matchmaker_ticket, matchmaker_ticket, MatchmakerTicket);
    on_handler!(on_matchmaker_matched, matchmaker_matched, MatchmakerMatched);
    on_handler!(on_status_presence, status_presence, StatusPresenceEvent);
    on_handler!(on_stream_presence, stream_presence, StreamPresenceEvent);
    on_handler!(on_stream_data, stream_data, StreamData);
    on_handler!(on_channel_message, channel_message, ChannelMessage);
    on_handler!(on_channel_presence, channel_presence, ChannelPresenceEvent);
    on_handler!(on_party_data, party_data, PartyData);
    on_handler!(on_party_presence, party_presence, PartyPresenceEvent);
    on_handler!(on_party_close, party_close, PartyClose);
    on_handler!(on_party_join_request, party_join_request, PartyJoinRequest);
    on_handler!(on_party_leader, party_leader, PartyLeader);
    on_handler!(on_party_matchmaker_ticket, party_matchmaker_ticket, PartyMatchmakerTicket);
    on_handler!(on_party, party, Party);

    /// Called exactly once when the dispatcher stops: `None` after an
    /// explicit stop, `Some(err)` when the connection failed.
    pub fn on_exit(mut self, handler: impl FnOnce(Option<ClientError>) + Send + 'static) -> Self {
        if let Ok(exit) = self.exit.get_mut() {
            *exit = Some(Box::new(handler));
        }
        self
    }

    /// Route a push payload to its handler. Unset handlers are skipped.
    pub(crate) fn dispatch(&self, message: Message) {
        fn call<T>(handler: &Handler<T>, payload: T) {
            if let Some(handler) = handler {
                handler(payload);
            }
        }

        match message {
            Message::Notifications(batch) => {
                if let Some(handler) = &self.notification {
                    for notification in batch.notifications {
                        handler(notification);
                    }
                }
            }
            Message::MatchData(m) => call(&self.match_data, m),
            Message::MatchPresenceEvent(m) => call(&self.match_presence, m),
            Message::MatchmakerTicket(m) => call(&self.matchmaker_ticket, m),
            Message::MatchmakerMatched(m) => call(&self.matchmaker_matched, m),
            Message::StatusPresenceEvent(m) => call(&self.status_presence, m),
            Message::StreamPresenceEvent(m) => call(&self.stream_presence, m),
            Message::StreamData(m) => call(&self.stream_data, m),
            Message::ChannelMessage(m) => call(&self.channel_message, m),
            Message::ChannelPresenceEvent(m) => call(&self.channel_presence, m),
            Message::PartyData(m) => call(&self.party_data, m),
            Message::PartyPresenceEvent(m) => call(&self.party_presence, m),
            Message::PartyClose(m) => call(&self.party_close, m),
            Message::PartyJoinRequest(m) => call(&self.party_join_request, m),
            Message::PartyLeader(m) => call(&self.party_leader, m),
            Message::PartyMatchmakerTicket(m) => call(&self.party_matchmaker_ticket, m),
            Message::Party(m) => call(&self.party, m),
            other => debug!(message = ?other, "Not a push payload, ignoring"),
        }
    }

    /// Fire the exit notification. Only the first call has any effect.
    pub(crate) fn exit(&self, err: Option<ClientError>) {
        let handler = self.exit.lock().ok().and_then(|mut exit| exit.take());
        if let Some(handler) = handler {
            handler(err);
        }
    }
}
