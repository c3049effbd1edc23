// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Requests awaiting their matching IQ response.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};

use xmpbee_xml::Stanza;

use crate::event::ClientEvent;

/// Entries not answered within this window are dropped, so the table
/// cannot grow without bound.
const PENDING_IQ_TTL: Duration = Duration::from_secs(300);

type Callback = Box<dyn FnOnce(&Stanza) -> Option<ClientEvent> + Send>;

struct Entry {
    created: Instant,
    callback: Callback,
}

/// One-shot callbacks keyed by outgoing IQ id.
#[derive(Default)]
pub(crate) struct PendingIqs {
    entries: HashMap<String, Entry>,
}

impl PendingIqs {
    pub(crate) fn new() -> PendingIqs {
        PendingIqs {
            entries: HashMap::new(),
        }
    }

    /// Register a callback for the given id. At most one entry per id; a
    /// second registration replaces the first.
    pub(crate) fn register(&mut self, id: String, callback: Callback) {
        self.entries.insert(
            id,
            Entry {
                created: Instant::now(),
                callback,
            },
        );
    }

    /// Fire and remove the callback for `id`. The outer `None` means the
    /// id was not ours.
    pub(crate) fn dispatch(&mut self, id: &str, response: &Stanza) -> Option<Option<ClientEvent>> {
        let entry = self.entries.remove(id)?;
        Some((entry.callback)(response))
    }

    /// Drop entries past their time-to-live.
    pub(crate) fn sweep(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.created) < PENDING_IQ_TTL);
    }
}
