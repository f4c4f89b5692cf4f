//! Protocol mock: an in-process stand-in for the realtime presence server.
//!
//! One [`PresenceServer`] is owned by one scenario run and shared (by cheap
//! clone) with every actor's [`ProtocolConnection`]. All state transitions
//! happen under a single lock, so:
//! - events for one session are queued in the order operations were issued
//! - the one-chat-at-a-time invariant holds under concurrent requests
//!   (first writer wins, the second is rejected)
//!
//! Delivery is asynchronous relative to the call that caused it: commands
//! only enqueue events on the recipients' channels and return immediately.
//!
//! ```text
//!  ProtocolConnection (A)          PresenceServer            ProtocolConnection (B)
//!        |                               |                               |
//!        |-- set_visibility(false) ----->|                               |
//!        |<----------- Ok(()) -----------|-- presence:update ----------->| (queued)
//!        |                               |                               |-- recv()
//! ```

use crate::scenario::{CompatibilityHint, PersonaPresence, PersonaPresenceScript, Vibe};
use presence_env::{GeoPoint, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Typed reason a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Unknown session '{0}'")]
    UnknownSession(SessionId),

    #[error("Invalid token for session '{0}'")]
    InvalidToken(SessionId),

    #[error("Session '{0}' is already connected")]
    AlreadyConnected(SessionId),

    #[error("Session '{0}' is not connected")]
    NotConnected(SessionId),

    #[error("One chat at a time")]
    ChatAlreadyActive,

    #[error("User is busy")]
    TargetBusy,

    #[error("Target session is not available")]
    TargetUnavailable,

    #[error("Cannot request a chat with yourself")]
    SelfChat,

    #[error("No active chat")]
    NoActiveChat,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl Rejection {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::UnknownSession(_) => "unknown_session",
            Rejection::InvalidToken(_) => "invalid_token",
            Rejection::AlreadyConnected(_) => "already_connected",
            Rejection::NotConnected(_) => "not_connected",
            Rejection::ChatAlreadyActive => "one_chat_at_a_time",
            Rejection::TargetBusy => "user_busy",
            Rejection::TargetUnavailable => "target_unavailable",
            Rejection::SelfChat => "self_chat",
            Rejection::NoActiveChat => "no_active_chat",
            Rejection::Malformed(_) => "malformed",
        }
    }
}

/// Commands a client sends over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "radar:subscribe")]
    RadarSubscribe,

    #[serde(rename = "location:update")]
    LocationUpdate(GeoPoint),

    #[serde(rename = "chat:request", rename_all = "camelCase")]
    ChatRequest { target_session_id: SessionId },

    #[serde(rename = "chat:message")]
    ChatMessage { text: String },

    #[serde(rename = "chat:end")]
    ChatEnd,

    #[serde(rename = "panic:trigger")]
    PanicTrigger,
}

/// Why a chat ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEndReason {
    UserExit,
    PeerDisconnected,
    Panic,
}

/// One row of a presence roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub session_id: SessionId,
    pub handle: String,
    pub vibe: Vibe,
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    pub compatibility: CompatibilityHint,
}

/// Events the server pushes to a connected session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { session_id: SessionId, handle: String },

    #[serde(rename = "presence:update")]
    PresenceUpdate { people: Vec<PresenceEntry> },

    #[serde(rename = "chat:started", rename_all = "camelCase")]
    ChatStarted {
        partner_session_id: SessionId,
        partner_handle: String,
    },

    #[serde(rename = "chat:message", rename_all = "camelCase")]
    ChatMessage { from_session_id: SessionId, text: String },

    #[serde(rename = "chat:ended")]
    ChatEnded { reason: ChatEndReason },

    #[serde(rename = "panic:confirmed")]
    PanicConfirmed,

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    fn rejected(rejection: &Rejection) -> Self {
        ServerEvent::Error {
            code: rejection.code().to_string(),
            message: rejection.to_string(),
        }
    }

    /// Session ids in a presence roster, if this is one.
    pub fn roster(&self) -> Option<Vec<SessionId>> {
        match self {
            ServerEvent::PresenceUpdate { people } => {
                Some(people.iter().map(|p| p.session_id.clone()).collect())
            }
            _ => None,
        }
    }
}

/// Point-in-time view of one session's connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub visible: bool,
    pub active_chat_peer: Option<SessionId>,
}

/// Counters collected while the server runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMetrics {
    /// Events queued on a live channel
    pub events_delivered: u64,

    /// Events whose receiver was already gone
    pub events_dropped: u64,

    /// Commands refused with a typed reason
    pub rejections: u64,

    /// Chats successfully started
    pub chats_started: u64,
}

struct SessionState {
    persona: PersonaPresence,
    visible: bool,
    active_chat_peer: Option<SessionId>,
    /// Present while connected.
    outbox: Option<mpsc::UnboundedSender<ServerEvent>>,
    /// Bumped on every connect so stale handles cannot release a newer one.
    epoch: u64,
}

impl SessionState {
    fn connected(&self) -> bool {
        self.outbox.is_some()
    }
}

struct ServerState {
    /// Script order, used for deterministic roster ordering.
    order: Vec<SessionId>,
    sessions: HashMap<SessionId, SessionState>,
    metrics: ServerMetrics,
}

impl ServerState {
    fn deliver(&mut self, to: &SessionId, event: ServerEvent) {
        let Some(outbox) = self.sessions.get(to).and_then(|s| s.outbox.as_ref()) else {
            return;
        };
        if outbox.send(event).is_ok() {
            self.metrics.events_delivered += 1;
        } else {
            self.metrics.events_dropped += 1;
        }
    }

    fn is_present(&self, id: &SessionId) -> bool {
        self.sessions
            .get(id)
            .map(|s| s.connected() && s.visible)
            .unwrap_or(false)
    }

    /// Peers `viewer` can currently see.
    fn roster_for(&self, viewer: &SessionId) -> Vec<PresenceEntry> {
        let Some(me) = self.sessions.get(viewer) else {
            return Vec::new();
        };
        self.order
            .iter()
            .filter(|id| *id != viewer && self.is_present(id))
            .filter_map(|id| self.sessions.get(id))
            .map(|peer| PresenceEntry {
                session_id: peer.persona.session_id.clone(),
                handle: peer.persona.handle.clone(),
                vibe: peer.persona.vibe,
                tags: peer.persona.tags.clone(),
                geo: peer.persona.geo,
                compatibility: me.persona.compatibility(&peer.persona),
            })
            .collect()
    }

    fn send_roster(&mut self, to: &SessionId) {
        let people = self.roster_for(to);
        self.deliver(to, ServerEvent::PresenceUpdate { people });
    }

    /// Pushes fresh rosters to every other connected and visible peer.
    fn broadcast_presence(&mut self, origin: &SessionId) {
        let recipients: Vec<SessionId> = self
            .order
            .iter()
            .filter(|id| *id != origin && self.is_present(id))
            .cloned()
            .collect();
        for id in recipients {
            self.send_roster(&id);
        }
    }

    /// Clears a chat on both sides and tells the partner.
    fn end_chat(&mut self, id: &SessionId, reason: ChatEndReason) -> Option<SessionId> {
        let peer = self.sessions.get_mut(id)?.active_chat_peer.take()?;
        if let Some(partner) = self.sessions.get_mut(&peer) {
            partner.active_chat_peer = None;
        }
        self.deliver(&peer, ServerEvent::ChatEnded { reason });
        Some(peer)
    }

    fn require_connected(&self, id: &SessionId) -> Result<&SessionState, Rejection> {
        match self.sessions.get(id) {
            None => Err(Rejection::UnknownSession(id.clone())),
            Some(s) if !s.connected() => Err(Rejection::NotConnected(id.clone())),
            Some(s) => Ok(s),
        }
    }

    fn handle(&mut self, sender: &SessionId, message: ClientMessage) -> Result<(), Rejection> {
        match message {
            ClientMessage::RadarSubscribe => {
                self.send_roster(sender);
                Ok(())
            }
            ClientMessage::LocationUpdate(geo) => {
                geo.validate().map_err(Rejection::Malformed)?;
                if let Some(s) = self.sessions.get_mut(sender) {
                    s.persona.geo = Some(geo);
                }
                self.broadcast_presence(sender);
                Ok(())
            }
            ClientMessage::ChatRequest { target_session_id } => {
                self.request_chat(sender, &target_session_id)
            }
            ClientMessage::ChatMessage { text } => {
                let peer = self
                    .sessions
                    .get(sender)
                    .and_then(|s| s.active_chat_peer.clone())
                    .ok_or(Rejection::NoActiveChat)?;
                self.deliver(
                    &peer,
                    ServerEvent::ChatMessage {
                        from_session_id: sender.clone(),
                        text,
                    },
                );
                Ok(())
            }
            ClientMessage::ChatEnd => {
                if self.end_chat(sender, ChatEndReason::UserExit).is_some() {
                    self.deliver(sender, ServerEvent::ChatEnded { reason: ChatEndReason::UserExit });
                }
                Ok(())
            }
            ClientMessage::PanicTrigger => {
                self.end_chat(sender, ChatEndReason::Panic);
                if let Some(s) = self.sessions.get_mut(sender) {
                    s.visible = false;
                }
                self.broadcast_presence(sender);
                self.deliver(sender, ServerEvent::PanicConfirmed);
                Ok(())
            }
        }
    }

    fn request_chat(&mut self, sender: &SessionId, target: &SessionId) -> Result<(), Rejection> {
        if sender == target {
            return Err(Rejection::SelfChat);
        }
        let requester = self.require_connected(sender)?;
        if requester.active_chat_peer.is_some() {
            return Err(Rejection::ChatAlreadyActive);
        }
        let requester_handle = requester.persona.handle.clone();

        let target_state = self
            .sessions
            .get(target)
            .ok_or_else(|| Rejection::UnknownSession(target.clone()))?;
        if !target_state.connected() || !target_state.visible {
            return Err(Rejection::TargetUnavailable);
        }
        if target_state.active_chat_peer.is_some() {
            return Err(Rejection::TargetBusy);
        }
        let target_handle = target_state.persona.handle.clone();

        if let Some(s) = self.sessions.get_mut(sender) {
            s.active_chat_peer = Some(target.clone());
        }
        if let Some(s) = self.sessions.get_mut(target) {
            s.active_chat_peer = Some(sender.clone());
        }
        self.metrics.chats_started += 1;

        self.deliver(
            sender,
            ServerEvent::ChatStarted {
                partner_session_id: target.clone(),
                partner_handle: target_handle,
            },
        );
        self.deliver(
            target,
            ServerEvent::ChatStarted {
                partner_session_id: sender.clone(),
                partner_handle: requester_handle,
            },
        );
        debug!("chat started: {} <-> {}", sender, target);
        Ok(())
    }
}

/// Scenario-scoped fake presence server.
///
/// Cloning yields another handle to the same state; two scenario runs that
/// each build their own server never observe each other.
#[derive(Clone)]
pub struct PresenceServer {
    state: Arc<Mutex<ServerState>>,
}

impl PresenceServer {
    /// Creates a server whose known sessions are the script's personas.
    pub fn new(script: &PersonaPresenceScript) -> Self {
        let order = script.session_ids();
        let sessions = script
            .personas
            .iter()
            .map(|p| {
                (
                    p.session_id.clone(),
                    SessionState {
                        persona: p.clone(),
                        visible: p.visibility_default,
                        active_chat_peer: None,
                        outbox: None,
                        epoch: 0,
                    },
                )
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(ServerState {
                order,
                sessions,
                metrics: ServerMetrics::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the push channel for a session.
    ///
    /// The new connection immediately receives `connected` followed by its
    /// roster; visible peers receive an updated roster including it.
    pub fn connect(&self, session_id: &SessionId, token: &str) -> Result<ProtocolConnection, Rejection> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Rejection::UnknownSession(session_id.clone()))?;
        if session.persona.token != token || token.is_empty() {
            return Err(Rejection::InvalidToken(session_id.clone()));
        }
        if session.connected() {
            return Err(Rejection::AlreadyConnected(session_id.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        session.outbox = Some(tx);
        session.epoch += 1;
        let epoch = session.epoch;
        let handle = session.persona.handle.clone();

        state.deliver(
            session_id,
            ServerEvent::Connected {
                session_id: session_id.clone(),
                handle,
            },
        );
        state.send_roster(session_id);
        state.broadcast_presence(session_id);
        debug!("connected: {} (epoch {})", session_id, epoch);

        Ok(ProtocolConnection {
            session_id: session_id.clone(),
            epoch,
            server: self.clone(),
            events: rx,
        })
    }

    /// Marks a session disconnected.
    ///
    /// The session drops out of every peer's roster at once; its visibility
    /// and attributes are kept for the next connect. An active chat ends and
    /// the partner is told. Returns false if it was not connected.
    pub fn disconnect(&self, session_id: &SessionId) -> bool {
        let mut state = self.lock();
        Self::disconnect_locked(&mut state, session_id)
    }

    fn disconnect_locked(state: &mut ServerState, session_id: &SessionId) -> bool {
        match state.sessions.get_mut(session_id) {
            Some(s) if s.connected() => s.outbox = None,
            _ => return false,
        }
        state.end_chat(session_id, ChatEndReason::PeerDisconnected);
        state.broadcast_presence(session_id);
        debug!("disconnected: {}", session_id);
        true
    }

    fn release(&self, session_id: &SessionId, epoch: u64) -> bool {
        let mut state = self.lock();
        let current = state
            .sessions
            .get(session_id)
            .map(|s| s.connected() && s.epoch == epoch)
            .unwrap_or(false);
        current && Self::disconnect_locked(&mut state, session_id)
    }

    /// Sets a session's visibility and pushes new rosters to its peers.
    ///
    /// A disconnected session keeps the new value silently; it applies on
    /// reconnect.
    pub fn set_visibility(&self, session_id: &SessionId, visible: bool) -> Result<(), Rejection> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Rejection::UnknownSession(session_id.clone()))?;
        session.visible = visible;
        if session.connected() {
            state.broadcast_presence(session_id);
        }
        debug!("visibility: {} -> {}", session_id, visible);
        Ok(())
    }

    /// Processes a typed command from a connected session.
    ///
    /// A rejection is returned to the caller and echoed to the sender's
    /// channel as an `error` event; peers are never affected.
    pub fn send(&self, session_id: &SessionId, message: ClientMessage) -> Result<(), Rejection> {
        let mut state = self.lock();
        let connected = state.require_connected(session_id).map(|_| ());
        let result = connected.and_then(|()| state.handle(session_id, message));
        if let Err(rejection) = &result {
            state.metrics.rejections += 1;
            state.deliver(session_id, ServerEvent::rejected(rejection));
            debug!("rejected command from {}: {}", session_id, rejection);
        }
        result
    }

    /// Wire entry point: parses a JSON command then dispatches it.
    pub fn send_raw(&self, session_id: &SessionId, raw: &str) -> Result<(), Rejection> {
        match serde_json::from_str::<ClientMessage>(raw) {
            Ok(message) => self.send(session_id, message),
            Err(e) => {
                let rejection = Rejection::Malformed(e.to_string());
                let mut state = self.lock();
                state.metrics.rejections += 1;
                state.deliver(session_id, ServerEvent::rejected(&rejection));
                warn!("malformed message from {}: {}", session_id, e);
                Err(rejection)
            }
        }
    }

    /// Force-disconnects every session and clears all chats.
    ///
    /// Used by teardown; safe at any point in a script.
    pub fn reset(&self) -> usize {
        let mut state = self.lock();
        let mut closed = 0;
        for session in state.sessions.values_mut() {
            session.active_chat_peer = None;
            if session.outbox.take().is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            debug!("reset: force-disconnected {} sessions", closed);
        }
        closed
    }

    pub fn snapshot(&self, session_id: &SessionId) -> Option<ConnectionSnapshot> {
        let state = self.lock();
        state.sessions.get(session_id).map(|s| ConnectionSnapshot {
            connected: s.connected(),
            visible: s.visible,
            active_chat_peer: s.active_chat_peer.clone(),
        })
    }

    /// Peers `viewer` would see in a roster computed now.
    pub fn visible_peers(&self, viewer: &SessionId) -> Vec<SessionId> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter(|id| *id != viewer && state.is_present(id))
            .cloned()
            .collect()
    }

    pub fn connected_sessions(&self) -> Vec<SessionId> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter(|id| state.sessions.get(*id).map(|s| s.connected()).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Compatibility hint between two scripted sessions.
    pub fn compatibility(&self, a: &SessionId, b: &SessionId) -> Option<CompatibilityHint> {
        let state = self.lock();
        let a = state.sessions.get(a)?;
        let b = state.sessions.get(b)?;
        Some(a.persona.compatibility(&b.persona))
    }

    pub fn metrics(&self) -> ServerMetrics {
        self.lock().metrics.clone()
    }
}

/// One actor's live channel to the [`PresenceServer`].
///
/// Dropping the connection disconnects the session (unless a newer
/// connection for the same session has replaced it).
pub struct ProtocolConnection {
    session_id: SessionId,
    epoch: u64,
    server: PresenceServer,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl ProtocolConnection {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn server(&self) -> &PresenceServer {
        &self.server
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), Rejection> {
        self.server.send(&self.session_id, message)
    }

    pub fn send_raw(&self, raw: &str) -> Result<(), Rejection> {
        self.server.send_raw(&self.session_id, raw)
    }

    pub fn request_chat(&self, target: &SessionId) -> Result<(), Rejection> {
        self.send(ClientMessage::ChatRequest {
            target_session_id: target.clone(),
        })
    }

    pub fn set_visibility(&self, visible: bool) -> Result<(), Rejection> {
        self.server.set_visibility(&self.session_id, visible)
    }

    /// True while this handle is the session's live connection.
    pub fn is_live(&self) -> bool {
        let state = self.server.lock();
        state
            .sessions
            .get(&self.session_id)
            .map(|s| s.connected() && s.epoch == self.epoch)
            .unwrap_or(false)
    }

    /// Next event, waiting until one arrives or the channel closes.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// All queued events.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Waits for the first event matching `predicate`, discarding others.
    ///
    /// Returns `None` when the bound elapses or the channel closes.
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut predicate: F) -> Option<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Latest roster among the queued events, if any.
    pub fn latest_roster(&mut self) -> Option<Vec<SessionId>> {
        self.drain().iter().rev().find_map(ServerEvent::roster)
    }

    /// Disconnects this session. Returns false if it was already gone.
    pub fn close(self) -> bool {
        self.server.release(&self.session_id, self.epoch)
    }
}

impl Drop for ProtocolConnection {
    fn drop(&mut self) {
        self.server.release(&self.session_id, self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::PersonaPresence;
    use proptest::prelude::*;

    fn id(s: &str) -> SessionId {
        SessionId::new(s)
    }

    fn script() -> PersonaPresenceScript {
        PersonaPresenceScript::new(
            "campus-library",
            vec![
                PersonaPresence::new("maya", "QuietOwl", Vibe::Thinking)
                    .with_tags(["Overthinking Things", "Books"]),
                PersonaPresence::new("zoe", "NeonFox", Vibe::Surprise)
                    .with_tags(["Overthinking Things"]),
                PersonaPresence::new("ethan", "Circuit", Vibe::Banter).with_tags(["Tech curious"]),
                PersonaPresence::new("marcus", "Ledger", Vibe::Intros).hidden(),
            ],
        )
        .unwrap()
    }

    fn connect(server: &PresenceServer, name: &str) -> ProtocolConnection {
        server.connect(&id(name), &format!("{}-token", name)).unwrap()
    }

    #[test]
    fn test_connect_sends_handshake_then_roster() {
        let server = PresenceServer::new(&script());
        let _zoe = connect(&server, "zoe");
        let mut maya = connect(&server, "maya");

        let events = maya.drain();
        assert!(matches!(&events[0], ServerEvent::Connected { handle, .. } if handle == "QuietOwl"));
        assert_eq!(events[1].roster(), Some(vec![id("zoe")]));

        if let ServerEvent::PresenceUpdate { people } = &events[1] {
            assert!(people[0].compatibility.shared_tags.contains("Overthinking Things"));
        }
    }

    #[test]
    fn test_connect_rejects_bad_token_and_unknown_session() {
        let server = PresenceServer::new(&script());
        assert_eq!(
            server.connect(&id("maya"), "wrong").err(),
            Some(Rejection::InvalidToken(id("maya")))
        );
        assert_eq!(
            server.connect(&id("ghost"), "ghost-token").err(),
            Some(Rejection::UnknownSession(id("ghost")))
        );
        assert!(server.connected_sessions().is_empty());
    }

    #[test]
    fn test_session_id_cannot_be_shared_by_two_live_actors() {
        let server = PresenceServer::new(&script());
        let _first = connect(&server, "maya");
        assert_eq!(
            server.connect(&id("maya"), "maya-token").err(),
            Some(Rejection::AlreadyConnected(id("maya")))
        );
    }

    #[test]
    fn test_hidden_session_is_excluded_from_presence() {
        let server = PresenceServer::new(&script());
        let _maya = connect(&server, "maya");
        let mut zoe = connect(&server, "zoe");
        zoe.drain();

        server.set_visibility(&id("maya"), false).unwrap();
        assert!(!server.visible_peers(&id("zoe")).contains(&id("maya")));
        assert_eq!(zoe.latest_roster(), Some(vec![]));

        server.set_visibility(&id("maya"), true).unwrap();
        assert_eq!(server.visible_peers(&id("zoe")), vec![id("maya")]);
        assert_eq!(zoe.latest_roster(), Some(vec![id("maya")]));
    }

    #[test]
    fn test_default_hidden_persona_never_appears() {
        let server = PresenceServer::new(&script());
        let _marcus = connect(&server, "marcus");
        let _maya = connect(&server, "maya");
        assert!(server.visible_peers(&id("maya")).is_empty());
    }

    #[test]
    fn test_disconnect_removes_from_peers_and_reconnect_restores_visibility() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let _zoe = connect(&server, "zoe");

        maya.set_visibility(false).unwrap();
        assert!(maya.close());
        assert!(!server.snapshot(&id("maya")).unwrap().connected);
        assert!(server.visible_peers(&id("zoe")).is_empty());

        let _maya = connect(&server, "maya");
        let snapshot = server.snapshot(&id("maya")).unwrap();
        assert!(snapshot.connected);
        assert!(!snapshot.visible, "last explicit visibility must survive reconnect");
        assert!(server.visible_peers(&id("zoe")).is_empty());
    }

    #[test]
    fn test_disconnected_session_emits_nothing() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let mut zoe = connect(&server, "zoe");
        maya.close();
        zoe.drain();

        server.set_visibility(&id("maya"), true).unwrap();
        assert!(zoe.drain().is_empty());
    }

    #[test]
    fn test_chat_pairing_is_symmetric() {
        let server = PresenceServer::new(&script());
        let mut maya = connect(&server, "maya");
        let mut zoe = connect(&server, "zoe");
        maya.drain();
        zoe.drain();

        maya.request_chat(&id("zoe")).unwrap();
        assert_eq!(server.snapshot(&id("maya")).unwrap().active_chat_peer, Some(id("zoe")));
        assert_eq!(server.snapshot(&id("zoe")).unwrap().active_chat_peer, Some(id("maya")));

        assert!(matches!(maya.try_recv(), Some(ServerEvent::ChatStarted { partner_session_id, .. }) if partner_session_id == id("zoe")));
        assert!(matches!(zoe.try_recv(), Some(ServerEvent::ChatStarted { partner_session_id, .. }) if partner_session_id == id("maya")));
    }

    #[test]
    fn test_second_chat_rejected_to_sender_only() {
        let server = PresenceServer::new(&script());
        let mut maya = connect(&server, "maya");
        let _zoe = connect(&server, "zoe");
        let mut ethan = connect(&server, "ethan");

        maya.request_chat(&id("zoe")).unwrap();
        maya.drain();
        ethan.drain();

        assert_eq!(maya.request_chat(&id("ethan")), Err(Rejection::ChatAlreadyActive));
        assert!(matches!(maya.try_recv(), Some(ServerEvent::Error { code, .. }) if code == "one_chat_at_a_time"));
        assert!(ethan.drain().is_empty());
        assert_eq!(server.snapshot(&id("ethan")).unwrap().active_chat_peer, None);
    }

    #[test]
    fn test_busy_target_rejected() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let _zoe = connect(&server, "zoe");
        let ethan = connect(&server, "ethan");

        maya.request_chat(&id("zoe")).unwrap();
        assert_eq!(ethan.request_chat(&id("zoe")), Err(Rejection::TargetBusy));
        assert_eq!(server.snapshot(&id("zoe")).unwrap().active_chat_peer, Some(id("maya")));
    }

    #[test]
    fn test_chat_with_unavailable_targets() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let _marcus = connect(&server, "marcus");

        assert_eq!(maya.request_chat(&id("zoe")), Err(Rejection::TargetUnavailable));
        assert_eq!(maya.request_chat(&id("marcus")), Err(Rejection::TargetUnavailable));
        assert_eq!(maya.request_chat(&id("maya")), Err(Rejection::SelfChat));
        assert_eq!(server.metrics().rejections, 3);
    }

    #[test]
    fn test_command_from_disconnected_session_is_typed_rejection() {
        let server = PresenceServer::new(&script());
        assert_eq!(
            server.send(&id("maya"), ClientMessage::RadarSubscribe),
            Err(Rejection::NotConnected(id("maya")))
        );
    }

    #[test]
    fn test_disconnect_ends_chat_and_notifies_partner() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let mut zoe = connect(&server, "zoe");
        maya.request_chat(&id("zoe")).unwrap();
        zoe.drain();

        drop(maya);
        assert_eq!(server.snapshot(&id("zoe")).unwrap().active_chat_peer, None);
        assert!(zoe
            .drain()
            .contains(&ServerEvent::ChatEnded { reason: ChatEndReason::PeerDisconnected }));
    }

    #[test]
    fn test_chat_message_and_end() {
        let server = PresenceServer::new(&script());
        let mut maya = connect(&server, "maya");
        let mut zoe = connect(&server, "zoe");

        assert_eq!(
            maya.send(ClientMessage::ChatMessage { text: "hi".into() }),
            Err(Rejection::NoActiveChat)
        );
        maya.request_chat(&id("zoe")).unwrap();
        maya.drain();
        zoe.drain();

        maya.send(ClientMessage::ChatMessage { text: "hi".into() }).unwrap();
        assert_eq!(
            zoe.try_recv(),
            Some(ServerEvent::ChatMessage { from_session_id: id("maya"), text: "hi".into() })
        );

        zoe.send(ClientMessage::ChatEnd).unwrap();
        assert_eq!(server.snapshot(&id("maya")).unwrap().active_chat_peer, None);
        assert_eq!(maya.try_recv(), Some(ServerEvent::ChatEnded { reason: ChatEndReason::UserExit }));
    }

    #[test]
    fn test_panic_hides_and_ends_chat() {
        let server = PresenceServer::new(&script());
        let mut maya = connect(&server, "maya");
        let mut zoe = connect(&server, "zoe");
        maya.request_chat(&id("zoe")).unwrap();
        maya.drain();
        zoe.drain();

        maya.send(ClientMessage::PanicTrigger).unwrap();
        let snapshot = server.snapshot(&id("maya")).unwrap();
        assert!(!snapshot.visible);
        assert_eq!(snapshot.active_chat_peer, None);
        assert_eq!(maya.try_recv(), Some(ServerEvent::PanicConfirmed));

        let zoe_events = zoe.drain();
        assert_eq!(zoe_events[0], ServerEvent::ChatEnded { reason: ChatEndReason::Panic });
        assert_eq!(zoe_events[1].roster(), Some(vec![]));
    }

    #[test]
    fn test_raw_wire_messages() {
        let server = PresenceServer::new(&script());
        let mut maya = connect(&server, "maya");
        let _zoe = connect(&server, "zoe");
        maya.drain();

        maya.send_raw(r#"{"type":"chat:request","payload":{"targetSessionId":"zoe"}}"#)
            .unwrap();
        assert_eq!(server.snapshot(&id("maya")).unwrap().active_chat_peer, Some(id("zoe")));

        let err = maya.send_raw("{not json").unwrap_err();
        assert_eq!(err.code(), "malformed");
    }

    #[test]
    fn test_location_update_is_validated() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        assert!(maya.send(ClientMessage::LocationUpdate(GeoPoint::new(10.0, 10.0))).is_ok());
        assert!(matches!(
            maya.send(ClientMessage::LocationUpdate(GeoPoint::new(100.0, 10.0))),
            Err(Rejection::Malformed(_))
        ));
    }

    #[test]
    fn test_reset_leaves_no_orphans() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let _zoe = connect(&server, "zoe");
        maya.request_chat(&id("zoe")).unwrap();

        assert_eq!(server.reset(), 2);
        assert!(server.connected_sessions().is_empty());
        assert_eq!(server.snapshot(&id("zoe")).unwrap().active_chat_peer, None);
        assert!(!maya.is_live());
    }

    #[test]
    fn test_stale_handle_does_not_release_new_connection() {
        let server = PresenceServer::new(&script());
        let old = connect(&server, "maya");
        server.disconnect(&id("maya"));
        let new = connect(&server, "maya");

        drop(old);
        assert!(new.is_live());
    }

    #[test]
    fn test_servers_are_isolated() {
        let a = PresenceServer::new(&script());
        let b = PresenceServer::new(&script());
        let _maya = connect(&a, "maya");
        assert!(b.connected_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_bounded() {
        let server = PresenceServer::new(&script());
        let mut maya = connect(&server, "maya");
        let got = maya
            .wait_for(Duration::from_millis(50), |e| matches!(e, ServerEvent::ChatStarted { .. }))
            .await;
        assert!(got.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_first_writer_wins() {
        let server = PresenceServer::new(&script());
        let maya = connect(&server, "maya");
        let ethan = connect(&server, "ethan");
        let _zoe = connect(&server, "zoe");

        let a = tokio::spawn(async move {
            let r = maya.request_chat(&id("zoe"));
            (r, maya)
        });
        let b = tokio::spawn(async move {
            let r = ethan.request_chat(&id("zoe"));
            (r, ethan)
        });
        let (ra, _maya) = a.await.unwrap();
        let (rb, _ethan) = b.await.unwrap();

        assert!(ra.is_ok() ^ rb.is_ok());
        let loser = if ra.is_ok() { rb } else { ra };
        assert_eq!(loser, Err(Rejection::TargetBusy));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Connect(usize),
        Disconnect(usize),
        Chat(usize, usize),
        End(usize),
        Panic(usize),
        Visibility(usize, bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize).prop_map(Op::Connect),
            (0..4usize).prop_map(Op::Disconnect),
            (0..4usize, 0..4usize).prop_map(|(a, b)| Op::Chat(a, b)),
            (0..4usize).prop_map(Op::End),
            (0..4usize).prop_map(Op::Panic),
            (0..4usize, any::<bool>()).prop_map(|(a, v)| Op::Visibility(a, v)),
        ]
    }

    proptest! {
        #[test]
        fn prop_one_chat_at_a_time(ops in proptest::collection::vec(op(), 1..60)) {
            let script = script();
            let ids = script.session_ids();
            let server = PresenceServer::new(&script);
            let mut live: HashMap<usize, ProtocolConnection> = HashMap::new();

            for op in ops {
                match op {
                    Op::Connect(i) => {
                        if let Ok(c) = server.connect(&ids[i], &format!("{}-token", ids[i])) {
                            live.insert(i, c);
                        }
                    }
                    Op::Disconnect(i) => { live.remove(&i); }
                    Op::Chat(a, b) => { let _ = server.send(&ids[a], ClientMessage::ChatRequest { target_session_id: ids[b].clone() }); }
                    Op::End(i) => { let _ = server.send(&ids[i], ClientMessage::ChatEnd); }
                    Op::Panic(i) => { let _ = server.send(&ids[i], ClientMessage::PanicTrigger); }
                    Op::Visibility(i, v) => { let _ = server.set_visibility(&ids[i], v); }
                }

                for me in &ids {
                    let snap = server.snapshot(me).unwrap();
                    if let Some(peer) = snap.active_chat_peer {
                        prop_assert!(snap.connected);
                        let other = server.snapshot(&peer).unwrap();
                        prop_assert_eq!(other.active_chat_peer, Some(me.clone()));
                        prop_assert!(other.connected);
                    }
                    if !snap.connected || !snap.visible {
                        for viewer in &ids {
                            prop_assert!(!server.visible_peers(viewer).contains(me));
                        }
                    }
                }
            }
        }
    }
}
