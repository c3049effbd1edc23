// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Jabber identifiers.
//!
//! A JID is `localpart@domain`, optionally followed by `/resource`. The
//! validator enforces the RFC 6122 shape before any I/O happens: part
//! lengths of at most 1023 bytes, no control characters, exactly one `@` in
//! the bare part, and a hostname-valid domain.

use core::fmt;
use core::str::FromStr;
use std::error::Error as StdError;

const MAX_PART_LEN: usize = 1023;

/// Error from JID validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    /// No `@` separating localpart and domain.
    NoAt,
    /// More than one `@` in the bare part.
    TooManyAts,
    /// The localpart is empty.
    EmptyLocal,
    /// The localpart does not start with an ASCII letter or digit, or
    /// contains a character localparts cannot carry.
    InvalidLocal,
    /// The domain is not a valid hostname.
    InvalidDomain,
    /// The resource is empty or contains a control character.
    InvalidResource,
    /// A part exceeds 1023 bytes.
    PartTooLong,
}

impl fmt::Display for JidError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JidError::NoAt => write!(fmt, "no @ in JID"),
            JidError::TooManyAts => write!(fmt, "more than one @ in JID"),
            JidError::EmptyLocal => write!(fmt, "empty localpart"),
            JidError::InvalidLocal => write!(fmt, "invalid character in localpart"),
            JidError::InvalidDomain => write!(fmt, "domain is not a valid hostname"),
            JidError::InvalidResource => write!(fmt, "invalid resource"),
            JidError::PartTooLong => write!(fmt, "JID part longer than 1023 bytes"),
        }
    }
}

impl StdError for JidError {}

/// A validated Jabber identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: String,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Parse and validate.
    pub fn new(s: &str) -> Result<Jid, JidError> {
        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) => (bare, Some(resource)),
            None => (s, None),
        };
        let (local, domain) = bare.split_once('@').ok_or(JidError::NoAt)?;
        if domain.contains('@') {
            return Err(JidError::TooManyAts);
        }
        validate_local(local)?;
        validate_domain(domain)?;
        let resource = match resource {
            Some(resource) => {
                validate_resource(resource)?;
                Some(resource.to_owned())
            }
            None => None,
        };
        Ok(Jid {
            local: local.to_owned(),
            domain: domain.to_owned(),
            resource,
        })
    }

    /// The localpart.
    pub fn node(&self) -> &str {
        &self.local
    }

    /// The domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource, if this is a full JID.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// `localpart@domain` without the resource.
    pub fn bare(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// This JID with the given resource attached.
    pub fn with_resource(&self, resource: &str) -> Result<Jid, JidError> {
        validate_resource(resource)?;
        Ok(Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: Some(resource.to_owned()),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Jid, JidError> {
        Jid::new(s)
    }
}

fn validate_local(local: &str) -> Result<(), JidError> {
    if local.is_empty() {
        return Err(JidError::EmptyLocal);
    }
    if local.len() > MAX_PART_LEN {
        return Err(JidError::PartTooLong);
    }
    let mut chars = local.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return Err(JidError::InvalidLocal),
    }
    for c in local.chars() {
        if c.is_control() || c == '\u{7f}' {
            return Err(JidError::InvalidLocal);
        }
        // RFC 6122 localpart exclusions.
        if matches!(c, '"' | '&' | '\'' | '/' | ':' | '<' | '>' | '@' | ' ') {
            return Err(JidError::InvalidLocal);
        }
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), JidError> {
    if domain.is_empty() || domain.len() > 253 {
        return Err(JidError::InvalidDomain);
    }
    if domain.len() > MAX_PART_LEN {
        return Err(JidError::PartTooLong);
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(JidError::InvalidDomain);
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(JidError::InvalidDomain);
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(JidError::InvalidDomain);
        }
    }
    Ok(())
}

fn validate_resource(resource: &str) -> Result<(), JidError> {
    if resource.is_empty() {
        return Err(JidError::InvalidResource);
    }
    if resource.len() > MAX_PART_LEN {
        return Err(JidError::PartTooLong);
    }
    if resource.chars().any(|c| c.is_control() || c == '\u{7f}') {
        return Err(JidError::InvalidResource);
    }
    Ok(())
}
