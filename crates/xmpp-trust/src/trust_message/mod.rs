// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The data model of trust messages (XEP-0434) and their use for Automatic
//! Trust Management (XEP-0450).
//!
//! A [`TrustMessageElement`] is attached to a message and carries one
//! [`KeyOwner`] per account whose keys are being trusted or distrusted.

use serde::{Deserialize, Serialize};

use crate::{types::KeyId, utilities::bare_jid};

mod uri;
mod xml;

pub use uri::{TrustMessageUri, UriError};
pub use xml::TrustMessageParseError;

/// The namespace of the `<trust-message/>` element.
pub const NS_TM: &str = "urn:xmpp:tm:1";

/// The usage of trust messages sent for Automatic Trust Management.
///
/// Trust message elements with any other usage are ignored by the ATM engine.
pub const NS_ATM: &str = "urn:xmpp:atm:1";

/// The namespace of OMEMO 2, the usual encryption a trust message is about.
pub const NS_OMEMO_2: &str = "urn:xmpp:omemo:2";

/// The trust decisions of a trust message about the keys of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOwner {
    jid: String,
    trusted_keys: Vec<KeyId>,
    distrusted_keys: Vec<KeyId>,
}

impl KeyOwner {
    /// Create a key owner without any keys.
    ///
    /// The JID is stored in its bare form.
    pub fn new(jid: &str) -> Self {
        Self { jid: bare_jid(jid).to_owned(), ..Default::default() }
    }

    /// Create a key owner with the given trusted and distrusted keys.
    pub fn with_keys(jid: &str, trusted_keys: Vec<KeyId>, distrusted_keys: Vec<KeyId>) -> Self {
        Self { jid: bare_jid(jid).to_owned(), trusted_keys, distrusted_keys }
    }

    /// The bare JID of the key owner.
    pub fn jid(&self) -> &str {
        &self.jid
    }

    /// The IDs of the keys that are trusted (authenticated).
    pub fn trusted_keys(&self) -> &[KeyId] {
        &self.trusted_keys
    }

    /// The IDs of the keys that are distrusted.
    pub fn distrusted_keys(&self) -> &[KeyId] {
        &self.distrusted_keys
    }

    /// Replace the trusted keys.
    pub fn set_trusted_keys(&mut self, key_ids: Vec<KeyId>) {
        self.trusted_keys = key_ids;
    }

    /// Replace the distrusted keys.
    pub fn set_distrusted_keys(&mut self, key_ids: Vec<KeyId>) {
        self.distrusted_keys = key_ids;
    }

    /// Does this key owner carry neither trusted nor distrusted keys.
    pub fn is_empty(&self) -> bool {
        self.trusted_keys.is_empty() && self.distrusted_keys.is_empty()
    }
}

/// A `<trust-message/>` element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustMessageElement {
    usage: String,
    encryption: String,
    key_owners: Vec<KeyOwner>,
}

impl TrustMessageElement {
    /// Create a new trust message element.
    ///
    /// # Arguments
    ///
    /// * `usage` - The namespace of the protocol using the trust message,
    ///   [`NS_ATM`] for Automatic Trust Management.
    ///
    /// * `encryption` - The namespace of the encryption protocol the keys
    ///   belong to.
    ///
    /// * `key_owners` - The trust decisions, grouped by key owner.
    pub fn new(usage: &str, encryption: &str, key_owners: Vec<KeyOwner>) -> Self {
        Self { usage: usage.to_owned(), encryption: encryption.to_owned(), key_owners }
    }

    /// Create a trust message element for Automatic Trust Management.
    pub fn atm(encryption: &str, key_owners: Vec<KeyOwner>) -> Self {
        Self::new(NS_ATM, encryption, key_owners)
    }

    /// The namespace of the protocol using this trust message.
    pub fn usage(&self) -> &str {
        &self.usage
    }

    /// The namespace of the encryption protocol the keys belong to.
    pub fn encryption(&self) -> &str {
        &self.encryption
    }

    /// The trust decisions, grouped by key owner.
    pub fn key_owners(&self) -> &[KeyOwner] {
        &self.key_owners
    }

    /// Append a key owner.
    pub fn add_key_owner(&mut self, key_owner: KeyOwner) {
        self.key_owners.push(key_owner);
    }

    /// Is this trust message meant for Automatic Trust Management.
    pub fn is_atm(&self) -> bool {
        self.usage == NS_ATM
    }
}
