// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use zeroize::Zeroizing;

/// A set of authentication credentials.
///
/// The password is wrapped in [`Zeroizing`] storage: it is wiped from
/// memory when the credentials (or the mechanism that consumed them) are
/// dropped, and mechanisms additionally wipe it as soon as the exchange
/// concludes.
pub struct Credentials {
    /// Authentication identity.
    pub username: String,
    /// Secret.
    pub password: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Credentials from a username and password.
    pub fn new<U: Into<String>, P: Into<Vec<u8>>>(username: U, password: P) -> Credentials {
        Credentials {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}
