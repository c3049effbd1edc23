// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Delayed-delivery timestamps (XEP-0203).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Parse a `<delay stamp='…'/>` value.
///
/// Servers in the wild produce three shapes: RFC 3339 with and without
/// fractional seconds, and a legacy compact form without separators in the
/// date, which is taken as UTC.
pub(crate) fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(stamp) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&t));
    }
    None
}
