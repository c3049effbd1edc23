// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Append-only chat logs.
//!
//! One text file per conversation per day, under
//! `<root>/<account>/<room>/YYYY-MM-DD.txt`. Both path components are
//! sanitized before they touch the filesystem. All writes funnel through
//! a single worker task, which also serves the restart reader that
//! reconstructs recent chat messages for a reopened conversation.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::room::{ChatKind, ChatMessage};

/// Sanitized path components never exceed this many characters.
const MAX_COMPONENT_LEN: usize = 200;

/// Make a user-controlled string safe as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\u{0}'..='\u{1f}' | '\u{7f}' => {}
            '/' | '\\' => out.push('_'),
            c => out.push(c),
        }
    }
    out = out.replace("..", "__");
    if out.starts_with('.') {
        out.insert(0, '_');
    }
    if out.chars().count() > MAX_COMPONENT_LEN {
        out = out.chars().take(MAX_COMPONENT_LEN).collect();
    }
    if out.is_empty() {
        out = "_unknown".to_owned();
    }
    out
}

/// Render a message as its log line, without the trailing newline.
pub fn format_line(message: &ChatMessage) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let reason = if message.body.is_empty() {
        String::new()
    } else {
        format!(" ({})", message.body)
    };
    match message.kind {
        ChatKind::Chat => format!("[{}] <{}> {}", time, message.sender, message.body),
        ChatKind::Action => format!("[{}] * {} {}", time, message.sender, message.body),
        ChatKind::Join => format!("[{}] → {} has joined", time, message.sender),
        ChatKind::Part => format!("[{}] ← {} has left{}", time, message.sender, reason),
        ChatKind::Quit => format!("[{}] ⇐ {} has quit{}", time, message.sender, reason),
        ChatKind::Topic => format!(
            "[{}] ✦ {} changed the topic to: {}",
            time, message.sender, message.body
        ),
        ChatKind::System => format!("[{}] • {}", time, message.body),
    }
}

/// Parse one line back. Only chat and action lines are reconstructed.
fn parse_line(date: NaiveDate, line: &str) -> Option<ChatMessage> {
    if !line.starts_with('[') || line.len() < 11 {
        return None;
    }
    let time = NaiveTime::parse_from_str(line.get(1..9)?, "%H:%M:%S").ok()?;
    if line.get(9..11)? != "] " {
        return None;
    }
    let rest = line.get(11..)?;

    let naive = date.and_time(time);
    let timestamp = match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    };

    if let Some(rest) = rest.strip_prefix('<') {
        let (sender, body) = rest.split_once("> ")?;
        return Some(ChatMessage::at(timestamp, ChatKind::Chat, sender, body));
    }
    if let Some(rest) = rest.strip_prefix("* ") {
        let (sender, body) = rest.split_once(' ')?;
        return Some(ChatMessage::at(timestamp, ChatKind::Action, sender, body));
    }
    None
}

fn day_path(root: &Path, account: &str, room: &str, date: NaiveDate) -> PathBuf {
    root.join(sanitize_component(account))
        .join(sanitize_component(room))
        .join(format!("{}.txt", date.format("%Y-%m-%d")))
}

/// Append `message` to the right day file, unless the rendered line is
/// already somewhere in it.
fn append_to_dir(
    root: &Path,
    account: &str,
    room: &str,
    message: &ChatMessage,
) -> std::io::Result<()> {
    let date = message.timestamp.with_timezone(&Local).date_naive();
    let path = day_path(root, account, room, date);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = format_line(message);
    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.contains(&line) {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Reconstruct the most recent chat messages of a conversation: the day
/// files of the last `days` days in chronological order, capped to the
/// last `limit` messages. Lines that do not open with a bracketed time
/// continue the previous message's body.
fn load_recent_from_dir(
    root: &Path,
    account: &str,
    room: &str,
    days: u32,
    limit: usize,
    today: NaiveDate,
) -> Vec<ChatMessage> {
    let dir = root
        .join(sanitize_component(account))
        .join(sanitize_component(room));
    let cutoff = today - chrono::Duration::days(i64::from(days.saturating_sub(1)));

    let mut dates: Vec<NaiveDate> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let stem = name.strip_suffix(".txt")?;
                NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
            })
            .filter(|date| *date >= cutoff)
            .collect(),
        Err(_) => return Vec::new(),
    };
    dates.sort();

    let mut messages: Vec<ChatMessage> = Vec::new();
    for date in dates {
        let content = match fs::read_to_string(dir.join(format!("{}.txt", date.format("%Y-%m-%d")))) {
            Ok(content) => content,
            Err(_) => continue,
        };
        for line in content.lines() {
            if let Some(message) = parse_line(date, line) {
                messages.push(message);
            } else if !line.starts_with('[') {
                // Continuation of a multi-line body.
                if let Some(last) = messages.last_mut() {
                    last.body.push('\n');
                    last.body.push_str(line);
                }
            }
        }
    }
    if messages.len() > limit {
        messages.drain(..messages.len() - limit);
    }
    messages
}

enum LogCommand {
    Append {
        account: String,
        room: String,
        message: ChatMessage,
    },
    Load {
        account: String,
        room: String,
        days: u32,
        limit: usize,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
}

/// Handle to the log worker. Cheap to clone; all I/O happens on the
/// worker task, in submission order.
#[derive(Clone)]
pub struct LogStore {
    tx: mpsc::UnboundedSender<LogCommand>,
}

impl LogStore {
    /// Spawn the worker writing under `root`.
    pub fn spawn(root: PathBuf) -> LogStore {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    LogCommand::Append {
                        account,
                        room,
                        message,
                    } => {
                        if let Err(e) = append_to_dir(&root, &account, &room, &message) {
                            warn!("log append for {}/{} failed: {}", account, room, e);
                        }
                    }
                    LogCommand::Load {
                        account,
                        room,
                        days,
                        limit,
                        reply,
                    } => {
                        let today = Local::now().date_naive();
                        let _ = reply.send(load_recent_from_dir(
                            &root, &account, &room, days, limit, today,
                        ));
                    }
                }
            }
        });
        LogStore { tx }
    }

    /// Queue a line for appending.
    pub fn append(&self, account: &str, room: &str, message: &ChatMessage) {
        let _ = self.tx.send(LogCommand::Append {
            account: account.to_owned(),
            room: room.to_owned(),
            message: message.clone(),
        });
    }

    /// Load the recent transcript of a conversation.
    pub async fn load_recent(
        &self,
        account: &str,
        room: &str,
        days: u32,
        limit: usize,
    ) -> Vec<ChatMessage> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(LogCommand::Load {
                account: account.to_owned(),
                room: room.to_owned(),
                days,
                limit,
                reply,
            })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_component("general"), "general");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component("../../etc"), "_____etc");
        assert_eq!(sanitize_component(".hidden"), "_.hidden");
        assert_eq!(sanitize_component("a\u{1}b\u{7f}c"), "abc");
        assert_eq!(sanitize_component(""), "_unknown");
        assert_eq!(sanitize_component("\u{3}"), "_unknown");
        let long = "x".repeat(500);
        assert_eq!(sanitize_component(&long).chars().count(), 200);
        // The full property: nothing dangerous survives.
        for nasty in ["../x", "a/../b", "..\\..\\x", "\u{0}\u{1f}", "...."] {
            let clean = sanitize_component(nasty);
            assert!(!clean.contains('/'), "{:?}", clean);
            assert!(!clean.contains('\\'), "{:?}", clean);
            assert!(!clean.contains(".."), "{:?}", clean);
            assert!(!clean.starts_with('.'), "{:?}", clean);
            assert!(clean.chars().all(|c| !c.is_control()));
        }
    }

    fn message_at(h: u32, m: u32, s: u32, kind: ChatKind, sender: &str, body: &str) -> ChatMessage {
        let date = Local::now().date_naive();
        let naive = date.and_hms_opt(h, m, s).unwrap();
        let timestamp = Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        ChatMessage::at(timestamp, kind, sender, body)
    }

    #[test]
    fn line_grammar() {
        assert!(format_line(&message_at(10, 0, 0, ChatKind::Chat, "bob", "hello"))
            .ends_with("<bob> hello"));
        assert!(format_line(&message_at(10, 0, 0, ChatKind::Action, "bob", "waves"))
            .ends_with("* bob waves"));
        assert!(format_line(&message_at(10, 0, 0, ChatKind::Join, "bob", ""))
            .ends_with("→ bob has joined"));
        assert!(format_line(&message_at(10, 0, 0, ChatKind::Part, "bob", "bye"))
            .ends_with("← bob has left (bye)"));
        assert!(format_line(&message_at(10, 0, 0, ChatKind::Part, "bob", ""))
            .ends_with("← bob has left"));
        assert!(format_line(&message_at(10, 0, 0, ChatKind::Quit, "bob", ""))
            .ends_with("⇐ bob has quit"));
        assert!(
            format_line(&message_at(10, 0, 0, ChatKind::Topic, "bob", "releases"))
                .ends_with("✦ bob changed the topic to: releases")
        );
        assert!(format_line(&message_at(10, 0, 0, ChatKind::System, "", "Connecting…"))
            .ends_with("• Connecting…"));
    }

    #[test]
    fn append_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let messages = [
            message_at(10, 0, 0, ChatKind::Chat, "bob", "hello"),
            message_at(10, 0, 5, ChatKind::Action, "alice", "waves"),
            message_at(10, 0, 9, ChatKind::Join, "carol", ""),
            message_at(10, 1, 0, ChatKind::Chat, "carol", "hi all"),
        ];
        for message in &messages {
            append_to_dir(root, "alice@example.org", "general", message).unwrap();
        }

        let today = Local::now().date_naive();
        let loaded = load_recent_from_dir(root, "alice@example.org", "general", 7, 100, today);
        // Joins are not reconstructed.
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].sender, "bob");
        assert_eq!(loaded[0].kind, ChatKind::Chat);
        assert_eq!(loaded[1].kind, ChatKind::Action);
        assert_eq!(loaded[1].body, "waves");
        assert_eq!(loaded[2].body, "hi all");
        for (message, loaded) in messages[..2].iter().zip(&loaded[..2]) {
            assert_eq!(
                message.timestamp.with_timezone(&Local).time(),
                loaded.timestamp.with_timezone(&Local).time()
            );
        }
    }

    #[test]
    fn duplicate_lines_are_suppressed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let message = message_at(10, 0, 0, ChatKind::Chat, "bob", "hello");
        append_to_dir(root, "acct", "room", &message).unwrap();
        append_to_dir(root, "acct", "room", &message).unwrap();

        let date = Local::now().date_naive();
        let content = fs::read_to_string(day_path(root, "acct", "room", date)).unwrap();
        assert_eq!(content.matches("<bob> hello").count(), 1);
    }

    #[test]
    fn multi_line_bodies_are_stitched_back() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let message = message_at(10, 0, 0, ChatKind::Chat, "bob", "first\nsecond line");
        append_to_dir(root, "acct", "room", &message).unwrap();

        let today = Local::now().date_naive();
        let loaded = load_recent_from_dir(root, "acct", "room", 7, 100, today);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].body, "first\nsecond line");
    }

    #[test]
    fn limit_keeps_the_most_recent_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for i in 0..10 {
            let message = message_at(10, 0, i, ChatKind::Chat, "bob", &format!("msg {}", i));
            append_to_dir(root, "acct", "room", &message).unwrap();
        }
        let today = Local::now().date_naive();
        let loaded = load_recent_from_dir(root, "acct", "room", 7, 4, today);
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[0].body, "msg 6");
        assert_eq!(loaded[3].body, "msg 9");
    }

    #[test]
    fn old_day_files_are_outside_the_window() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let today = Local::now().date_naive();
        let dir = root.join("acct").join("room");
        fs::create_dir_all(&dir).unwrap();
        let old = today - Duration::days(10);
        fs::write(
            dir.join(format!("{}.txt", old.format("%Y-%m-%d"))),
            "[10:00:00] <bob> ancient\n",
        )
        .unwrap();
        fs::write(
            dir.join(format!("{}.txt", today.format("%Y-%m-%d"))),
            "[10:00:00] <bob> fresh\n",
        )
        .unwrap();

        let loaded = load_recent_from_dir(root, "acct", "room", 7, 100, today);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].body, "fresh");
    }

    #[tokio::test]
    async fn worker_serializes_appends_and_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LogStore::spawn(tmp.path().to_path_buf());
        let message = message_at(10, 0, 0, ChatKind::Chat, "bob", "over the worker");
        store.append("acct", "room", &message);
        let loaded = store.load_recent("acct", "room", 7, 100).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].body, "over the worker");
    }
}
