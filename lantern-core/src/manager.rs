//! Host-driven API: ConnectionManager receives events from host, returns actions.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{self, Blob, TransportableFile};
use crate::error::Fault;
use crate::history::{BlobId, ChatEntry, MessageLog, Origin};
use crate::protocol::Message;
use crate::session::{EndCause, Session, SessionEvent, SessionId, SessionSignal};
use crate::timer::{TimerKind, Timers};
use crate::typing::TypingSignal;

/// Automatic reconnection attempts allowed after a drop, until the next manual connect.
pub const MAX_RECONNECT_ATTEMPTS: u8 = 5;

/// Default delay before an automatic reconnection attempt, in ticks.
pub const DEFAULT_RETRY_DELAY_TICKS: u64 = 5;

/// Default quiet period after the last keystroke before `Typing{false}` is sent, in ticks.
pub const DEFAULT_TYPING_DEBOUNCE_TICKS: u64 = 2;

/// Title used for system alerts about inbound messages.
pub const ALERT_TITLE: &str = "LANtern Message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub max_reconnect_attempts: u8,
    pub retry_delay_ticks: u64,
    pub typing_debounce_ticks: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            retry_delay_ticks: DEFAULT_RETRY_DELAY_TICKS,
            typing_debounce_ticks: DEFAULT_TYPING_DEBOUNCE_TICKS,
        }
    }
}

/// Everything the host can tell the core: user intents, transport callbacks, connectivity, clock.
#[derive(Debug, Clone)]
pub enum Event {
    /// Transport assigned our identity.
    IdentityAssigned(String),
    /// Transport failed to assign an identity.
    IdentityFailed(String),
    Connect(String),
    Disconnect,
    SendText(String),
    SendFile {
        bytes: Vec<u8>,
        name: String,
        mime_type: String,
    },
    /// Keystroke (`true`) or explicit stop (`false`).
    Typing(bool),
    ClearHistory,
    /// Presentation became visible or hidden.
    SetVisible(bool),
    SetNotificationsEnabled(bool),
    SetDarkMode(bool),
    /// Remote peer opened a session to us. The session is already open.
    Incoming { session: SessionId, remote: String },
    Session {
        session: SessionId,
        event: SessionEvent,
    },
    /// Transport-wide failure not tied to one session.
    TransportError(String),
    NetworkOnline,
    NetworkOffline,
    /// One time unit elapsed.
    Tick,
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenSession { session: SessionId, remote: String },
    CloseSession(SessionId),
    Send { session: SessionId, message: Message },
    /// Write the whole log under [`crate::history::HISTORY_KEY`].
    PersistHistory(Vec<ChatEntry>),
    /// Write the preference under [`crate::history::DARK_MODE_KEY`].
    PersistDarkMode(bool),
    /// Play the new-message sound.
    Chime,
    /// Show a system notification.
    Alert { title: String, body: String },
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub local_identity: Option<String>,
    pub remote_identity: Option<String>,
    pub reconnect_attempts: u8,
    pub peer_typing: bool,
    pub pending_retry: bool,
    pub history_len: usize,
    pub dark_mode: bool,
    pub last_fault: Option<String>,
}

/// Main coordinator. Owns the single active session; host passes events, core returns actions.
pub struct ConnectionManager {
    config: ManagerConfig,
    local_identity: Option<String>,
    remote_identity: Option<String>,
    state: ConnectionState,
    session: Option<Session>,
    reconnect_attempts: u8,
    timers: Timers,
    tick_count: u64,
    typing: TypingSignal,
    log: MessageLog,
    online: bool,
    /// Last disconnect was a drop, not a manual disconnect.
    dropped: bool,
    visible: bool,
    notifications: bool,
    dark_mode: bool,
    last_fault: Option<Fault>,
    shut_down: bool,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            config,
            local_identity: None,
            remote_identity: None,
            state: ConnectionState::Disconnected,
            session: None,
            reconnect_attempts: 0,
            timers: Timers::new(),
            tick_count: 0,
            typing: TypingSignal::new(),
            log: MessageLog::new(),
            online: true,
            dropped: false,
            visible: true,
            notifications: false,
            dark_mode: false,
            last_fault: None,
            shut_down: false,
        }
    }

    /// Set delay before an automatic reconnection attempt, in ticks.
    pub fn set_retry_delay(&mut self, ticks: u64) {
        self.config.retry_delay_ticks = ticks;
    }

    /// Set quiet period before the automatic typing stop, in ticks.
    pub fn set_typing_debounce(&mut self, ticks: u64) {
        self.config.typing_debounce_ticks = ticks;
    }

    pub fn set_max_reconnect_attempts(&mut self, n: u8) {
        self.config.max_reconnect_attempts = n;
    }

    /// Load persisted state once at startup.
    pub fn restore_persisted(&mut self, history: Vec<ChatEntry>, dark_mode: bool) {
        self.log.restore(history);
        self.dark_mode = dark_mode;
    }

    /// Single entry point. Runs one event to completion.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.shut_down {
            debug!(?event, "ignoring event after shutdown");
            return actions;
        }
        match event {
            Event::IdentityAssigned(id) => self.on_identity_assigned(id),
            Event::IdentityFailed(cause) => self.record(Fault::IdentityAssignment(cause)),
            Event::Connect(remote) => self.on_connect(&remote, &mut actions),
            Event::Disconnect => self.on_disconnect(&mut actions),
            Event::SendText(body) => self.on_send_text(body, &mut actions),
            Event::SendFile {
                bytes,
                name,
                mime_type,
            } => self.on_send_file(&bytes, &name, &mime_type, &mut actions),
            Event::Typing(active) => self.on_typing(active, &mut actions),
            Event::ClearHistory => {
                self.log.clear();
                info!("history cleared");
                self.persist(&mut actions);
            }
            Event::SetVisible(visible) => self.visible = visible,
            Event::SetNotificationsEnabled(enabled) => self.notifications = enabled,
            Event::SetDarkMode(enabled) => {
                self.dark_mode = enabled;
                actions.push(Action::PersistDarkMode(enabled));
            }
            Event::Incoming { session, remote } => self.on_incoming(session, remote, &mut actions),
            Event::Session { session, event } => {
                self.on_session_event(session, event, &mut actions)
            }
            Event::TransportError(cause) => self.on_transport_error(cause, &mut actions),
            Event::NetworkOnline => self.on_network_online(&mut actions),
            Event::NetworkOffline => self.on_network_offline(&mut actions),
            Event::Tick => self.on_tick(&mut actions),
        }
        actions
    }

    /// Teardown: cancel all timers and close the active session. Later events are ignored.
    pub fn shutdown(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.shut_down {
            return actions;
        }
        self.shut_down = true;
        self.timers.cancel_all();
        self.typing.reset_local();
        self.typing.clear_remote();
        if let Some(mut session) = self.session.take() {
            actions.extend(session.close());
        }
        self.state = ConnectionState::Disconnected;
        info!("connection manager shut down");
        actions
    }

    fn on_identity_assigned(&mut self, id: String) {
        if let Some(current) = &self.local_identity {
            debug!(current = %current, "local identity already assigned");
            return;
        }
        info!(identity = %id, "local identity assigned");
        self.local_identity = Some(id);
        self.reconnect_attempts = 0;
    }

    fn on_connect(&mut self, remote: &str, actions: &mut Vec<Action>) {
        let remote = remote.trim();
        if self.state != ConnectionState::Disconnected {
            return self.record(Fault::InvalidIntent("already connecting or connected"));
        }
        if remote.is_empty() {
            return self.record(Fault::InvalidIntent("empty remote identity"));
        }
        let Some(local) = &self.local_identity else {
            return self.record(Fault::InvalidIntent("local identity not assigned yet"));
        };
        if local == remote {
            return self.record(Fault::InvalidIntent("cannot connect to self"));
        }
        self.remote_identity = Some(remote.to_string());
        self.reconnect_attempts = 0;
        self.dropped = false;
        self.timers.cancel(TimerKind::Retry);
        self.open_session(actions);
    }

    fn on_disconnect(&mut self, actions: &mut Vec<Action>) {
        if let Some(mut session) = self.session.take() {
            actions.extend(session.close());
        }
        self.timers.cancel_all();
        self.typing.reset_local();
        self.typing.clear_remote();
        self.remote_identity = None;
        self.state = ConnectionState::Disconnected;
        self.dropped = false;
        info!("disconnected by user");
    }

    fn on_send_text(&mut self, body: String, actions: &mut Vec<Action>) {
        if self.state != ConnectionState::Connected {
            return self.record(Fault::InvalidIntent("send while not connected"));
        }
        if body.trim().is_empty() {
            return self.record(Fault::InvalidIntent("blank message"));
        }
        let Some(session) = &self.session else {
            return;
        };
        actions.extend(session.send(Message::Text { text: body.clone() }));
        if let Some(stop) = self.typing.stop() {
            self.timers.cancel(TimerKind::TypingStop);
            actions.extend(session.send(stop));
        }
        self.log.append(ChatEntry::text(Origin::Local, body));
        self.persist(actions);
    }

    fn on_send_file(&mut self, bytes: &[u8], name: &str, mime_type: &str, actions: &mut Vec<Action>) {
        if self.state != ConnectionState::Connected {
            return self.record(Fault::InvalidIntent("send while not connected"));
        }
        let Some(session) = &self.session else {
            return;
        };
        let payload = codec::encode_file(bytes, mime_type);
        actions.extend(session.send(Message::file(name, payload)));
        let locator = self.log.register_blob(Blob::from_bytes(bytes, mime_type));
        self.log
            .append(ChatEntry::file(Origin::Local, name, mime_type, locator));
        debug!(file = %name, size = bytes.len(), "file sent");
        self.persist(actions);
    }

    fn on_typing(&mut self, active: bool, actions: &mut Vec<Action>) {
        if self.state != ConnectionState::Connected {
            return self.record(Fault::InvalidIntent("typing while not connected"));
        }
        let Some(session) = &self.session else {
            return;
        };
        if active {
            if let Some(start) = self.typing.keystroke() {
                actions.extend(session.send(start));
            }
            self.timers.arm(
                TimerKind::TypingStop,
                self.tick_count,
                self.config.typing_debounce_ticks,
            );
        } else {
            self.timers.cancel(TimerKind::TypingStop);
            if let Some(stop) = self.typing.stop() {
                actions.extend(session.send(stop));
            }
        }
    }

    fn on_incoming(&mut self, id: SessionId, remote: String, actions: &mut Vec<Action>) {
        let from_self = self.local_identity.as_deref() == Some(remote.as_str());
        if remote.is_empty() || from_self {
            debug!(session = %id, "rejecting inbound session with invalid identity");
            actions.push(Action::CloseSession(id));
            return;
        }
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting
                if self.remote_identity.as_deref() == Some(remote.as_str()) =>
            {
                // Simultaneous open: both peers keep the session dialed by the smaller identity.
                let outbound_wins = self
                    .local_identity
                    .as_deref()
                    .is_some_and(|local| local < remote.as_str());
                if outbound_wins {
                    debug!(session = %id, remote = %remote, "rejecting inbound; outbound attempt wins");
                    actions.push(Action::CloseSession(id));
                    return;
                }
                debug!(session = %id, remote = %remote, "inbound wins over outbound attempt");
                if let Some(mut outbound) = self.session.take() {
                    actions.extend(outbound.close());
                }
            }
            _ => {
                debug!(session = %id, remote = %remote, "rejecting inbound; already busy");
                actions.push(Action::CloseSession(id));
                return;
            }
        }
        self.timers.cancel(TimerKind::Retry);
        info!(session = %id, remote = %remote, "accepted inbound session");
        self.session = Some(Session::accepted(id, remote.clone()));
        self.remote_identity = Some(remote);
        self.mark_connected();
    }

    fn on_session_event(&mut self, id: SessionId, event: SessionEvent, actions: &mut Vec<Action>) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            debug!(session = %id, "ignoring event for inactive session");
            return;
        };
        match session.apply(event) {
            None => {}
            Some(SessionSignal::Opened) => {
                info!(session = %id, remote = %session.remote(), "session opened");
                self.mark_connected();
            }
            Some(SessionSignal::Data(message)) => self.dispatch(message, actions),
            Some(SessionSignal::Ended(cause)) => {
                let fault = match cause {
                    EndCause::Closed => None,
                    EndCause::OpenFailed(cause) => Some(Fault::SessionOpen(cause)),
                    EndCause::Errored(cause) => Some(Fault::SessionRuntime(cause)),
                };
                self.drop_session(fault, true, actions);
            }
        }
    }

    fn on_transport_error(&mut self, cause: String, actions: &mut Vec<Action>) {
        match self.state {
            ConnectionState::Disconnected => self.record(Fault::SessionRuntime(cause)),
            ConnectionState::Connecting => {
                self.drop_session(Some(Fault::SessionOpen(cause)), true, actions)
            }
            ConnectionState::Connected => {
                self.drop_session(Some(Fault::SessionRuntime(cause)), true, actions)
            }
        }
    }

    fn on_network_offline(&mut self, actions: &mut Vec<Action>) {
        self.online = false;
        self.timers.cancel(TimerKind::Retry);
        if self.session.is_some() {
            info!("network offline; dropping session");
            self.drop_session(None, false, actions);
        }
    }

    fn on_network_online(&mut self, actions: &mut Vec<Action>) {
        // Only the offline-to-online transition reconnects; a repeated report changes nothing.
        let was_offline = !self.online;
        self.online = true;
        let eligible = was_offline
            && self.state == ConnectionState::Disconnected
            && self.dropped
            && self.remote_identity.is_some()
            && self.reconnect_attempts < self.config.max_reconnect_attempts;
        if eligible {
            info!("network online; reconnecting");
            self.timers.cancel(TimerKind::Retry);
            self.open_session(actions);
        }
    }

    fn on_tick(&mut self, actions: &mut Vec<Action>) {
        self.tick_count = self.tick_count.saturating_add(1);
        for kind in self.timers.take_due(self.tick_count) {
            match kind {
                TimerKind::TypingStop => {
                    if let Some(stop) = self.typing.stop() {
                        if let Some(session) = &self.session {
                            actions.extend(session.send(stop));
                        }
                    }
                }
                TimerKind::Retry => self.fire_retry(actions),
            }
        }
    }

    fn fire_retry(&mut self, actions: &mut Vec<Action>) {
        if self.state != ConnectionState::Disconnected
            || self.reconnect_attempts >= self.config.max_reconnect_attempts
        {
            return;
        }
        self.reconnect_attempts += 1;
        info!(attempt = self.reconnect_attempts, "reconnection attempt");
        self.open_session(actions);
    }

    fn dispatch(&mut self, message: Message, actions: &mut Vec<Action>) {
        match message {
            Message::Text { text } => {
                self.log.append(ChatEntry::text(Origin::Peer, text.clone()));
                self.persist(actions);
                self.announce(text, actions);
            }
            Message::Typing { is_typing } => self.typing.set_remote(is_typing),
            Message::File {
                file_name,
                file_type,
                file_data,
            } => {
                let payload = TransportableFile {
                    mime_type: file_type,
                    data: file_data,
                };
                let blob = match Blob::from_file(&payload) {
                    Ok(blob) => blob,
                    Err(e) => return self.record(Fault::Decode(e)),
                };
                let locator = self.log.register_blob(blob);
                self.log.append(ChatEntry::file(
                    Origin::Peer,
                    &file_name,
                    &payload.mime_type,
                    locator,
                ));
                self.persist(actions);
                self.announce(format!("Received file: {file_name}"), actions);
            }
        }
    }

    fn open_session(&mut self, actions: &mut Vec<Action>) {
        let Some(remote) = self.remote_identity.clone() else {
            return;
        };
        let session = Session::open(remote.clone());
        info!(session = %session.id(), remote = %remote, attempt = self.reconnect_attempts, "opening session");
        actions.push(Action::OpenSession {
            session: session.id(),
            remote,
        });
        self.session = Some(session);
        self.state = ConnectionState::Connecting;
    }

    fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.dropped = false;
    }

    /// Shared teardown for every non-manual disconnection.
    fn drop_session(&mut self, fault: Option<Fault>, retry: bool, actions: &mut Vec<Action>) {
        if let Some(mut session) = self.session.take() {
            actions.extend(session.close());
        }
        self.state = ConnectionState::Disconnected;
        self.dropped = true;
        self.typing.clear_remote();
        self.typing.reset_local();
        self.timers.cancel(TimerKind::TypingStop);
        if let Some(fault) = fault {
            self.record(fault);
        }
        if retry {
            self.schedule_retry();
        }
    }

    fn schedule_retry(&mut self) {
        if self.remote_identity.is_none() {
            return;
        }
        if !self.online {
            debug!("offline; reconnection waits for network");
            return;
        }
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            warn!(
                attempts = self.reconnect_attempts,
                "reconnection attempts exhausted"
            );
            return;
        }
        self.timers.arm(
            TimerKind::Retry,
            self.tick_count,
            self.config.retry_delay_ticks,
        );
        info!(
            attempt = self.reconnect_attempts + 1,
            delay = self.config.retry_delay_ticks,
            "reconnection scheduled"
        );
    }

    fn announce(&self, body: String, actions: &mut Vec<Action>) {
        actions.push(Action::Chime);
        if self.notifications && !self.visible {
            actions.push(Action::Alert {
                title: ALERT_TITLE.to_string(),
                body,
            });
        }
    }

    fn persist(&self, actions: &mut Vec<Action>) {
        actions.push(Action::PersistHistory(self.log.all().to_vec()));
    }

    fn record(&mut self, fault: Fault) {
        if fault.is_silent() {
            debug!(%fault, "intent ignored");
            return;
        }
        warn!(%fault, "recoverable fault");
        self.last_fault = Some(fault);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_identity(&self) -> Option<&str> {
        self.local_identity.as_deref()
    }

    pub fn remote_identity(&self) -> Option<&str> {
        self.remote_identity.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u8 {
        self.reconnect_attempts
    }

    pub fn peer_typing(&self) -> bool {
        self.typing.peer_typing()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(Session::id)
    }

    pub fn is_retry_pending(&self) -> bool {
        self.timers.is_pending(TimerKind::Retry)
    }

    pub fn history(&self) -> &[ChatEntry] {
        self.log.all()
    }

    pub fn blob(&self, id: &BlobId) -> Option<&Blob> {
        self.log.blob(id)
    }

    pub fn dark_mode(&self) -> bool {
        self.dark_mode
    }

    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            local_identity: self.local_identity.clone(),
            remote_identity: self.remote_identity.clone(),
            reconnect_attempts: self.reconnect_attempts,
            peer_typing: self.typing.peer_typing(),
            pending_retry: self.is_retry_pending(),
            history_len: self.log.len(),
            dark_mode: self.dark_mode,
            last_fault: self.last_fault.as_ref().map(ToString::to_string),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
