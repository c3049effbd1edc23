// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides concrete SASL client mechanisms.

mod plain;
mod scram;

pub use plain::Plain;
pub use scram::Scram;
