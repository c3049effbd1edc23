// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Account parameters as configured by the user and persisted in the
//! settings blob.

use serde::{Deserialize, Serialize};

use xmpbee_client::{Config, Error, Jid, SecurityMode};

fn default_resource() -> String {
    "XMPBee".to_owned()
}

/// A single XMPP identity and everything needed to bring it online.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Bare JID (`user@domain`).
    pub jid: String,
    /// Host to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Resource to bind.
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Encryption policy.
    #[serde(default)]
    pub security: SecurityMode,
    /// Nickname used in rooms.
    pub nickname: String,
    /// Conference service hosting the account's rooms.
    pub conference: String,
    /// Saved room names, joined on connect.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// Nicknames of saved direct-message conversations.
    #[serde(default)]
    pub dm_nicknames: Vec<String>,
    /// Pre-secret-store installs kept the password here. Migrated into
    /// the secret store and scrubbed on load; never written back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Account {
    /// The validated bare JID.
    pub fn validated_jid(&self) -> Result<Jid, Error> {
        let jid: Jid = self.jid.parse()?;
        Ok(jid)
    }

    /// Connection parameters for the protocol client. Validation happens
    /// here, before any I/O.
    pub fn client_config(&self) -> Result<Config, Error> {
        Ok(Config {
            jid: self.validated_jid()?,
            host: self.host.clone(),
            port: self.port,
            resource: self.resource.clone(),
            security: self.security,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            jid: "alice@example.org".to_owned(),
            host: "example.org".to_owned(),
            port: 5222,
            resource: default_resource(),
            security: SecurityMode::RequireTls,
            nickname: "alice".to_owned(),
            conference: "muc.example.org".to_owned(),
            rooms: vec!["general".to_owned()],
            dm_nicknames: vec![],
            password: None,
        }
    }

    #[test]
    fn config_carries_the_validated_jid() {
        let config = account().client_config().unwrap();
        assert_eq!(config.jid.bare(), "alice@example.org");
        assert_eq!(config.resource, "XMPBee");
    }

    #[test]
    fn invalid_jid_is_rejected_before_io() {
        let mut bad = account();
        bad.jid = "not a jid".to_owned();
        assert!(bad.client_config().is_err());
    }

    #[test]
    fn legacy_password_field_round_trips_through_serde() {
        let json = r#"{"jid":"a@b.org","host":"b.org","port":5222,
            "nickname":"a","conference":"muc.b.org","password":"hunter2"}"#;
        let account: Account = serde_json::from_str(json).unwrap();
        assert_eq!(account.password.as_deref(), Some("hunter2"));
        assert_eq!(account.resource, "XMPBee");
        let mut scrubbed = account;
        scrubbed.password = None;
        let out = serde_json::to_string(&scrubbed).unwrap();
        assert!(!out.contains("password"));
    }
}
