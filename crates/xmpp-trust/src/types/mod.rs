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

//! Module containing the core types shared by the trust storage, the trust
//! manager and the ATM engine.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

mod trust_level;

pub use trust_level::{SecurityPolicy, TrustLevel, TrustLevels};

/// The identifier of an end-to-end encryption key.
///
/// Key IDs are opaque byte strings, the trust engine never looks into them.
/// They are displayed and serialized as standard, padded base64, which is the
/// form they take on the wire.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    /// Create a new key ID from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode a key ID from its base64 form.
    pub fn from_base64(input: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self(STANDARD.decode(input.trim())?))
    }

    /// Encode the key ID as standard, padded base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Decode a key ID from its hexadecimal form, as used in trust message
    /// URIs.
    pub fn from_hex(input: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(input)?))
    }

    /// Encode the key ID as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Get the raw bytes of the key ID.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Is this key ID empty.
    ///
    /// Messages without end-to-end encryption metadata have an empty sender
    /// key ID.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyId").field(&self.to_base64()).finish()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl From<Vec<u8>> for KeyId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for KeyId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for KeyId {
    fn from(bytes: &[u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for KeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for KeyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Bare JIDs of key owners mapped to the IDs of their keys.
///
/// This is the unit in which keys are authenticated, distrusted and reported
/// as changed.
pub type KeysByOwner = BTreeMap<String, BTreeSet<KeyId>>;

/// Insert a single key into a [`KeysByOwner`] map.
pub(crate) fn insert_key(keys: &mut KeysByOwner, owner_jid: &str, key_id: KeyId) {
    keys.entry(owner_jid.to_owned()).or_default().insert(key_id);
}

/// Collect all the key IDs of a [`KeysByOwner`] map, regardless of owner.
pub(crate) fn all_key_ids(keys: &KeysByOwner) -> Vec<KeyId> {
    keys.values().flatten().cloned().collect()
}

/// Does the map contain the given key for the given owner.
pub(crate) fn contains_key(keys: &KeysByOwner, owner_jid: &str, key_id: &KeyId) -> bool {
    keys.get(owner_jid).is_some_and(|k| k.contains(key_id))
}
