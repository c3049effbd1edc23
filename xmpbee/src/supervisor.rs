// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The session supervisor.
//!
//! One task owns every account, connection and room. Protocol clients feed
//! it events through per-connection forwarders; the shell feeds it
//! commands through a [`SupervisorHandle`]. All state mutation happens
//! here, on one task, so observers see a consistent order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use xmpbee_client::{Client, ClientEvent, Error as ClientError, MessageEvent, MessageType};

use crate::account::Account;
use crate::event::{OccupantDelta, UiEvent};
use crate::logstore::LogStore;
use crate::room::{ChatKind, ChatMessage, Occupant, PresenceChange, Room};
use crate::store::{migrate_secrets, KvStore, SecretStore, Settings};

/// Automatic reconnects stop after this many attempts without a success.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Days of log history restored into a freshly opened conversation.
const DM_HISTORY_DAYS: u32 = 7;

/// Message cap on restored history.
const DM_HISTORY_LIMIT: usize = 100;

/// Backoff before reconnect attempt `attempt` (1-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    let secs = if attempt >= 5 { 32 } else { 1u64 << attempt };
    Duration::from_secs(secs.min(32))
}

enum Command {
    Connect { account: Account, password: String },
    Disconnect { account: String },
    Reconnect { account: String },
    SendGroupchat { account: String, room: String, body: String },
    SendDm { account: String, to: String, body: String },
    JoinRoom { account: String, room: String },
    LeaveRoom { account: String, room: String },
    BrowseRooms { account: String },
}

enum Internal {
    Client {
        account: String,
        epoch: u64,
        event: ClientEvent,
    },
    ReconnectDue {
        account: String,
    },
    HistoryLoaded {
        account: String,
        room: String,
        messages: Vec<ChatMessage>,
    },
}

/// Shell-facing handle. All verbs are fire-and-forget; outcomes come back
/// as [`UiEvent`]s.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    /// Bring an account online (and persist it, password included).
    pub fn connect(&self, account: Account, password: String) {
        let _ = self.tx.send(Command::Connect { account, password });
    }

    /// Take an account offline; automatic reconnection is suppressed
    /// until the next connect or reconnect.
    pub fn disconnect(&self, account: &str) {
        let _ = self.tx.send(Command::Disconnect {
            account: account.to_owned(),
        });
    }

    /// Reconnect now, resetting the backoff ladder.
    pub fn reconnect(&self, account: &str) {
        let _ = self.tx.send(Command::Reconnect {
            account: account.to_owned(),
        });
    }

    pub fn send_groupchat(&self, account: &str, room: &str, body: &str) {
        let _ = self.tx.send(Command::SendGroupchat {
            account: account.to_owned(),
            room: room.to_owned(),
            body: body.to_owned(),
        });
    }

    pub fn send_dm(&self, account: &str, to: &str, body: &str) {
        let _ = self.tx.send(Command::SendDm {
            account: account.to_owned(),
            to: to.to_owned(),
            body: body.to_owned(),
        });
    }

    /// Join a room by name (resolved against the account's conference
    /// service) or full JID; the name is persisted for future sessions.
    pub fn join_room(&self, account: &str, room: &str) {
        let _ = self.tx.send(Command::JoinRoom {
            account: account.to_owned(),
            room: room.to_owned(),
        });
    }

    pub fn leave_room(&self, account: &str, room: &str) {
        let _ = self.tx.send(Command::LeaveRoom {
            account: account.to_owned(),
            room: room.to_owned(),
        });
    }

    /// Ask the conference service for its room list.
    pub fn browse_rooms(&self, account: &str) {
        let _ = self.tx.send(Command::BrowseRooms {
            account: account.to_owned(),
        });
    }
}

struct AccountState {
    account: Account,
    client: Option<Client>,
    epoch: u64,
    rooms: Vec<Room>,
    attempts: u32,
    manual: bool,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl AccountState {
    fn new(account: Account) -> AccountState {
        AccountState {
            account,
            client: None,
            epoch: 0,
            rooms: Vec::new(),
            attempts: 0,
            manual: false,
            reconnect_timer: None,
        }
    }
}

/// The supervisor. Construct with [`Supervisor::new`] inside a runtime,
/// then drive it with [`Supervisor::run`].
pub struct Supervisor {
    accounts: HashMap<String, AccountState>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    ui: mpsc::UnboundedSender<UiEvent>,
    logs: LogStore,
    kv: KvStore,
    secrets: Box<dyn SecretStore>,
    settings: Settings,
    next_epoch: u64,
}

impl Supervisor {
    /// Set up persistence under `root` and return the supervisor and its
    /// handle. Legacy plaintext passwords found in the settings blob are
    /// migrated into the secret store here.
    pub fn new(
        root: PathBuf,
        secrets: Box<dyn SecretStore>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> (Supervisor, SupervisorHandle) {
        let kv = KvStore::new(&root);
        let mut settings = match kv.load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("could not load settings, starting fresh: {}", e);
                Settings::default()
            }
        };
        if migrate_secrets(&mut settings, &*secrets) {
            if let Err(e) = kv.save(&settings) {
                warn!("could not save migrated settings: {}", e);
            }
        }
        let logs = LogStore::spawn(root.join("logs"));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            accounts: HashMap::new(),
            cmd_rx,
            internal_tx,
            internal_rx,
            ui,
            logs,
            kv,
            secrets,
            settings,
            next_epoch: 0,
        };
        (supervisor, SupervisorHandle { tx: cmd_tx })
    }

    /// Accounts known from previous sessions.
    pub fn saved_accounts(&self) -> &[Account] {
        &self.settings.accounts
    }

    /// The account used last, if any.
    pub fn last_account(&self) -> Option<&str> {
        self.settings.last_account.as_deref()
    }

    /// The consumer loop. Ends when the handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { account, password } => {
                let key = account.jid.clone();
                if let Err(e) = account.client_config() {
                    let _ = self.ui.send(UiEvent::Error { account: key, error: e });
                    return;
                }
                if let Err(e) = self.secrets.put(&key, &password) {
                    warn!("could not store password for {}: {}", key, e);
                }
                self.settings.last_account = Some(key.clone());
                self.update_saved_account(account.clone());
                let state = self
                    .accounts
                    .entry(key.clone())
                    .or_insert_with(|| AccountState::new(account.clone()));
                state.account = account;
                state.manual = false;
                state.attempts = 0;
                cancel_timer(state);
                self.start_connection(&key);
            }
            Command::Disconnect { account } => {
                let Some(state) = self.accounts.get_mut(&account) else {
                    return;
                };
                state.manual = true;
                cancel_timer(state);
                if let Some(client) = state.client.take() {
                    let _ = client.disconnect().await;
                }
            }
            Command::Reconnect { account } => {
                let Some(state) = self.accounts.get_mut(&account) else {
                    return;
                };
                state.manual = false;
                state.attempts = 0;
                cancel_timer(state);
                if let Some(client) = state.client.take() {
                    let _ = client.disconnect().await;
                }
                self.start_connection(&account);
            }
            Command::SendGroupchat {
                account,
                room,
                body,
            } => {
                let Some(state) = self.accounts.get(&account) else {
                    return;
                };
                match &state.client {
                    Some(client) => {
                        if let Err(e) = client.send_groupchat(&room, &body).await {
                            let _ = self.ui.send(UiEvent::Error { account, error: e });
                        }
                    }
                    None => {
                        let _ = self.ui.send(UiEvent::Error {
                            account,
                            error: ClientError::NotConnected,
                        });
                    }
                }
            }
            Command::SendDm { account, to, body } => {
                self.ensure_dm_room(&account, &to);
                let Some(state) = self.accounts.get_mut(&account) else {
                    return;
                };
                let nickname = state.account.nickname.clone();
                if let Some(room) = state.rooms.iter_mut().find(|room| room.jid == to) {
                    // Chat messages are not reflected by the server, so
                    // echo locally.
                    let (kind, text) = classify_body(&body);
                    push_room_message(
                        &self.logs,
                        &self.ui,
                        &account,
                        room,
                        ChatMessage::new(kind, nickname, text),
                        false,
                        false,
                    );
                }
                match &state.client {
                    Some(client) => {
                        if let Err(e) = client.send_chat(&to, &body).await {
                            let _ = self.ui.send(UiEvent::Error { account, error: e });
                        }
                    }
                    None => {
                        let _ = self.ui.send(UiEvent::Error {
                            account,
                            error: ClientError::NotConnected,
                        });
                    }
                }
            }
            Command::JoinRoom { account, room } => {
                let mut saved = None;
                if let Some(state) = self.accounts.get_mut(&account) {
                    if !state.account.rooms.iter().any(|name| name == &room) {
                        state.account.rooms.push(room.clone());
                        saved = Some(state.account.clone());
                    }
                }
                if let Some(snapshot) = saved {
                    self.update_saved_account(snapshot);
                }
                self.join_known_room(&account, &room).await;
            }
            Command::LeaveRoom { account, room } => {
                let mut saved = None;
                {
                    let Some(state) = self.accounts.get_mut(&account) else {
                        return;
                    };
                    let nick = state.account.nickname.clone();
                    let Some(index) = state.rooms.iter().position(|r| r.jid == room) else {
                        return;
                    };
                    let removed = state.rooms.remove(index);
                    state.account.rooms.retain(|name| name != &removed.name);
                    saved = Some(state.account.clone());
                    if let Some(client) = &state.client {
                        let _ = client.leave_room(&room, &nick).await;
                    }
                }
                if let Some(snapshot) = saved {
                    self.update_saved_account(snapshot);
                }
            }
            Command::BrowseRooms { account } => {
                let Some(state) = self.accounts.get(&account) else {
                    return;
                };
                if let Some(client) = &state.client {
                    let conference = state.account.conference.clone();
                    if let Err(e) = client.browse_rooms(&conference).await {
                        let _ = self.ui.send(UiEvent::Error { account, error: e });
                    }
                }
            }
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Client {
                account,
                epoch,
                event,
            } => {
                match self.accounts.get(&account) {
                    Some(state) if state.epoch == epoch => {}
                    _ => {
                        // An earlier connection's afterlife.
                        debug!("dropping stale event for {}", account);
                        return;
                    }
                }
                self.handle_client_event(account, event).await;
            }
            Internal::ReconnectDue { account } => {
                let Some(state) = self.accounts.get_mut(&account) else {
                    return;
                };
                state.reconnect_timer = None;
                if state.manual || state.client.is_some() {
                    return;
                }
                self.start_connection(&account);
            }
            Internal::HistoryLoaded {
                account,
                room,
                messages,
            } => {
                let Some(state) = self.accounts.get_mut(&account) else {
                    return;
                };
                if let Some(target) = state.rooms.iter_mut().find(|r| r.jid == room) {
                    target.prepend_history(messages.clone());
                    let _ = self.ui.send(UiEvent::HistoryLoaded {
                        account,
                        room,
                        messages,
                    });
                }
            }
        }
    }

    async fn handle_client_event(&mut self, account: String, event: ClientEvent) {
        match event {
            ClientEvent::Connected => {
                let _ = self.ui.send(UiEvent::Connected {
                    account: account.clone(),
                });
                if let Some(state) = self.accounts.get_mut(&account) {
                    system_message(
                        &self.logs,
                        &self.ui,
                        &account,
                        state,
                        "Connected, negotiating session…".to_owned(),
                    );
                }
            }
            ClientEvent::Authenticated { bound_jid } => {
                let names = match self.accounts.get_mut(&account) {
                    Some(state) => {
                        state.attempts = 0;
                        system_message(
                            &self.logs,
                            &self.ui,
                            &account,
                            state,
                            format!("Signed in as {}", bound_jid),
                        );
                        state.account.rooms.clone()
                    }
                    None => return,
                };
                let _ = self.ui.send(UiEvent::Authenticated {
                    account: account.clone(),
                    bound_jid: bound_jid.to_string(),
                });
                for name in names {
                    self.join_known_room(&account, &name).await;
                }
            }
            ClientEvent::Message(message) => self.handle_message(&account, message),
            ClientEvent::Subject(subject) => self.handle_subject(&account, subject),
            ClientEvent::Presence(presence) => self.handle_presence(&account, presence),
            ClientEvent::RoomList { service, items } => {
                let _ = self.ui.send(UiEvent::RoomList {
                    account,
                    service,
                    items,
                });
            }
            ClientEvent::Disconnected(reason) => self.handle_disconnected(account, reason),
        }
    }

    fn handle_message(&mut self, account: &str, event: MessageEvent) {
        let (bare, resource) = split_full(&event.from);
        match event.kind {
            MessageType::Groupchat => {
                let Some(state) = self.accounts.get_mut(account) else {
                    return;
                };
                let Some(room) = state.rooms.iter_mut().find(|room| room.jid == bare) else {
                    debug!("groupchat message for unknown room {}", bare);
                    return;
                };
                let sender = resource.unwrap_or(bare).to_owned();
                deliver(&self.logs, &self.ui, account, room, sender, event);
            }
            MessageType::Chat | MessageType::Normal => {
                let partner = bare.to_owned();
                self.ensure_dm_room(account, &partner);
                let Some(state) = self.accounts.get_mut(account) else {
                    return;
                };
                let Some(room) = state.rooms.iter_mut().find(|room| room.jid == partner) else {
                    return;
                };
                let sender = room.name.clone();
                deliver(&self.logs, &self.ui, account, room, sender, event);
            }
        }
    }

    fn handle_subject(&mut self, account: &str, event: xmpbee_client::SubjectEvent) {
        let Some(state) = self.accounts.get_mut(account) else {
            return;
        };
        let Some(room) = state.rooms.iter_mut().find(|room| room.jid == event.room) else {
            return;
        };
        if room.topic.as_deref() == Some(event.subject.as_str()) && room.has_displayed_topic {
            return;
        }
        room.topic = Some(event.subject.clone());
        room.has_displayed_topic = true;
        let sender = event.nick.unwrap_or_default();
        push_room_message(
            &self.logs,
            &self.ui,
            account,
            room,
            ChatMessage::new(ChatKind::Topic, sender, event.subject.clone()),
            false,
            false,
        );
        let _ = self.ui.send(UiEvent::RoomSubject {
            account: account.to_owned(),
            room: event.room,
            subject: event.subject,
        });
    }

    fn handle_presence(&mut self, account: &str, event: xmpbee_client::PresenceEvent) {
        let (Some(room_jid), Some(nick)) = (event.room, event.nick) else {
            return;
        };
        let Some(state) = self.accounts.get_mut(account) else {
            return;
        };
        let Some(room) = state.rooms.iter_mut().find(|room| room.jid == room_jid) else {
            return;
        };

        if event.available {
            let occupant = Occupant {
                nick: nick.clone(),
                affiliation: event.affiliation,
                role: event.role,
            };
            match room.apply_available(occupant, event.self_presence) {
                PresenceChange::Snapshot(occupants) => {
                    let text = format!("Joined #{} ({} users)", room.name, occupants.len());
                    push_room_message(
                        &self.logs,
                        &self.ui,
                        account,
                        room,
                        ChatMessage::new(ChatKind::System, "", text),
                        false,
                        false,
                    );
                    let _ = self.ui.send(UiEvent::Presence {
                        account: account.to_owned(),
                        room: room_jid,
                        delta: OccupantDelta::Snapshot(occupants),
                    });
                }
                PresenceChange::Joined(occupant) => {
                    push_room_message(
                        &self.logs,
                        &self.ui,
                        account,
                        room,
                        ChatMessage::new(ChatKind::Join, occupant.nick.clone(), ""),
                        false,
                        false,
                    );
                    let _ = self.ui.send(UiEvent::Presence {
                        account: account.to_owned(),
                        room: room_jid,
                        delta: OccupantDelta::Joined(occupant),
                    });
                }
                PresenceChange::Updated => {
                    let _ = self.ui.send(UiEvent::Presence {
                        account: account.to_owned(),
                        room: room_jid,
                        delta: OccupantDelta::Snapshot(room.occupants().to_vec()),
                    });
                }
                _ => {}
            }
        } else {
            match room.apply_unavailable(&nick, event.self_presence) {
                PresenceChange::Left(nick) => {
                    push_room_message(
                        &self.logs,
                        &self.ui,
                        account,
                        room,
                        ChatMessage::new(
                            ChatKind::Part,
                            nick.clone(),
                            event.status.unwrap_or_default(),
                        ),
                        false,
                        false,
                    );
                    let _ = self.ui.send(UiEvent::Presence {
                        account: account.to_owned(),
                        room: room_jid,
                        delta: OccupantDelta::Left(nick),
                    });
                }
                PresenceChange::SelfLeft => {
                    let _ = self.ui.send(UiEvent::Presence {
                        account: account.to_owned(),
                        room: room_jid,
                        delta: OccupantDelta::Snapshot(Vec::new()),
                    });
                }
                _ => {}
            }
        }
    }

    fn handle_disconnected(&mut self, account: String, reason: Option<ClientError>) {
        let reason_text = reason.as_ref().map(|e| e.to_string());
        let permanent = reason.as_ref().map(ClientError::is_permanent).unwrap_or(false);
        {
            let Some(state) = self.accounts.get_mut(&account) else {
                return;
            };
            state.client = None;
            let text = match &reason_text {
                Some(reason) => format!("Disconnected: {}", reason),
                None => "Disconnected".to_owned(),
            };
            system_message(&self.logs, &self.ui, &account, state, text);
        }
        let _ = self.ui.send(UiEvent::Disconnected {
            account: account.clone(),
            reason: reason_text,
        });

        let Some(error) = reason else {
            // Requested locally; nothing to retry.
            return;
        };
        if permanent {
            let _ = self.ui.send(UiEvent::Error { account, error });
            return;
        }
        let manual = self
            .accounts
            .get(&account)
            .map(|state| state.manual)
            .unwrap_or(true);
        if !manual {
            self.schedule_reconnect(&account);
        }
    }

    fn schedule_reconnect(&mut self, account: &str) {
        let internal = self.internal_tx.clone();
        let Some(state) = self.accounts.get_mut(account) else {
            return;
        };
        if state.attempts >= MAX_RECONNECT_ATTEMPTS {
            system_message(
                &self.logs,
                &self.ui,
                account,
                state,
                "Max reconnection attempts reached".to_owned(),
            );
            return;
        }
        state.attempts += 1;
        let delay = reconnect_delay(state.attempts);
        system_message(
            &self.logs,
            &self.ui,
            account,
            state,
            format!(
                "Reconnecting in {}s… (attempt {}/{})",
                delay.as_secs(),
                state.attempts,
                MAX_RECONNECT_ATTEMPTS
            ),
        );
        cancel_timer(state);
        let key = account.to_owned();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ReconnectDue { account: key });
        }));
    }

    fn start_connection(&mut self, account: &str) {
        let password = match self.secrets.get(account) {
            Ok(Some(password)) => password,
            Ok(None) => {
                let _ = self.ui.send(UiEvent::Error {
                    account: account.to_owned(),
                    error: ClientError::ConnectionFailed("no stored password".to_owned()),
                });
                return;
            }
            Err(e) => {
                let _ = self.ui.send(UiEvent::Error {
                    account: account.to_owned(),
                    error: ClientError::ConnectionFailed(format!("secret store: {}", e)),
                });
                return;
            }
        };
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let Some(state) = self.accounts.get_mut(account) else {
            return;
        };
        let config = match state.account.client_config() {
            Ok(config) => config,
            Err(e) => {
                let _ = self.ui.send(UiEvent::Error {
                    account: account.to_owned(),
                    error: e,
                });
                return;
            }
        };
        state.epoch = epoch;
        let (tx, mut rx) = mpsc::channel(xmpbee_client::EVENT_QUEUE_DEPTH);
        state.client = Some(Client::connect(config, password, tx));
        system_message(
            &self.logs,
            &self.ui,
            account,
            state,
            format!(
                "Connecting to {}:{}…",
                state.account.host, state.account.port
            ),
        );

        let internal = self.internal_tx.clone();
        let key = account.to_owned();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal
                    .send(Internal::Client {
                        account: key.clone(),
                        epoch,
                        event,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Make sure a room by name (or full JID) exists and send the join
    /// presence; an existing room is reset for rejoin, keeping messages.
    async fn join_known_room(&mut self, account: &str, name: &str) {
        let Some(state) = self.accounts.get_mut(account) else {
            return;
        };
        let room_jid = if name.contains('@') {
            name.to_owned()
        } else {
            format!("{}@{}", name, state.account.conference)
        };
        match state.rooms.iter().position(|room| room.jid == room_jid) {
            Some(index) => state.rooms[index].reset_for_rejoin(),
            None => state
                .rooms
                .push(Room::new_muc(&room_jid, &state.account.nickname)),
        }
        let nick = state.account.nickname.clone();
        if let Some(client) = &state.client {
            if let Err(e) = client
                .join_room(&room_jid, &nick, xmpbee_client::DEFAULT_JOIN_HISTORY)
                .await
            {
                warn!("could not send join for {}: {}", room_jid, e);
            }
        }
    }

    /// Create the conversation for a direct-message partner if it does not
    /// exist yet, persist the nickname, and restore recent history off the
    /// consumer.
    fn ensure_dm_room(&mut self, account: &str, partner: &str) {
        let mut saved = None;
        {
            let Some(state) = self.accounts.get_mut(account) else {
                return;
            };
            if state.rooms.iter().any(|room| room.jid == partner) {
                return;
            }
            let room = Room::new_dm(partner, &state.account.nickname);
            let log_name = room.log_name();
            let nick = room.name.clone();
            state.rooms.push(room);
            if !state.account.dm_nicknames.iter().any(|n| n == &nick) {
                state.account.dm_nicknames.push(nick);
                saved = Some(state.account.clone());
            }

            let logs = self.logs.clone();
            let internal = self.internal_tx.clone();
            let key = account.to_owned();
            let room_jid = partner.to_owned();
            tokio::spawn(async move {
                let messages = logs
                    .load_recent(&key, &log_name, DM_HISTORY_DAYS, DM_HISTORY_LIMIT)
                    .await;
                if !messages.is_empty() {
                    let _ = internal.send(Internal::HistoryLoaded {
                        account: key,
                        room: room_jid,
                        messages,
                    });
                }
            });
        }
        if let Some(snapshot) = saved {
            self.update_saved_account(snapshot);
        }
    }

    fn update_saved_account(&mut self, account: Account) {
        self.settings.accounts.retain(|saved| saved.jid != account.jid);
        self.settings.accounts.push(account);
        if let Err(e) = self.kv.save(&self.settings) {
            warn!("could not save settings: {}", e);
        }
    }
}

fn cancel_timer(state: &mut AccountState) {
    if let Some(timer) = state.reconnect_timer.take() {
        timer.abort();
    }
}

fn split_full(jid: &str) -> (&str, Option<&str>) {
    match jid.split_once('/') {
        Some((bare, resource)) => (bare, Some(resource)),
        None => (jid, None),
    }
}

/// `/me` bodies become action lines.
fn classify_body(body: &str) -> (ChatKind, &str) {
    match body.strip_prefix("/me ") {
        Some(rest) => (ChatKind::Action, rest),
        None => (ChatKind::Chat, body),
    }
}

fn deliver(
    logs: &LogStore,
    ui: &mpsc::UnboundedSender<UiEvent>,
    account: &str,
    room: &mut Room,
    sender: String,
    event: MessageEvent,
) {
    let (kind, text) = classify_body(&event.body);
    let timestamp = event.timestamp.unwrap_or_else(Utc::now);
    let message = ChatMessage::at(timestamp, kind, sender, text);
    // Replayed history the transcript already has is dropped entirely,
    // including from the log.
    if event.delayed && room.is_duplicate(&message) {
        return;
    }
    let notify = message.sender != room.nickname;
    push_room_message(logs, ui, account, room, message, event.delayed, notify);
}

fn push_room_message(
    logs: &LogStore,
    ui: &mpsc::UnboundedSender<UiEvent>,
    account: &str,
    room: &mut Room,
    message: ChatMessage,
    delayed: bool,
    notify: bool,
) {
    room.push_message(message.clone());
    logs.append(account, &room.log_name(), &message);
    let _ = ui.send(UiEvent::Message {
        account: account.to_owned(),
        room: room.jid.clone(),
        message,
        delayed,
        notify,
    });
}

fn system_message(
    logs: &LogStore,
    ui: &mpsc::UnboundedSender<UiEvent>,
    account: &str,
    state: &mut AccountState,
    text: String,
) {
    match state.rooms.first_mut() {
        Some(room) => push_room_message(
            logs,
            ui,
            account,
            room,
            ChatMessage::new(ChatKind::System, "", text),
            false,
            false,
        ),
        None => debug!("[{}] {}", account, text),
    }
}
