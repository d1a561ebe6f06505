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

use std::sync::Arc;

use async_trait::async_trait;
use xmpp_trust_common::AsyncTraitDeps;

use super::{KeysByTrustLevel, PostponedTrustDecisions, Result, TrustLevelsByOwner};
use crate::{
    trust_message::KeyOwner,
    types::{KeyId, KeysByOwner, SecurityPolicy, TrustLevel, TrustLevels},
};

/// Represents a store that the [`TrustManager`] uses to store the trust data
/// of end-to-end encryption keys.
///
/// Every method takes the namespace of the encryption protocol the data
/// belongs to, the data of different namespaces never interacts.
///
/// [`TrustManager`]: crate::TrustManager
#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
pub trait TrustStorage: AsyncTraitDeps {
    /// Set the security policy of an encryption protocol.
    async fn set_security_policy(&self, encryption: &str, policy: SecurityPolicy) -> Result<()>;

    /// Reset the security policy of an encryption protocol to
    /// [`SecurityPolicy::NoSecurityPolicy`].
    async fn reset_security_policy(&self, encryption: &str) -> Result<()>;

    /// Get the security policy of an encryption protocol.
    async fn security_policy(&self, encryption: &str) -> Result<SecurityPolicy>;

    /// Store the ID of the key this client instance uses.
    async fn set_own_key(&self, encryption: &str, key_id: KeyId) -> Result<()>;

    /// Forget the ID of the own key.
    async fn reset_own_key(&self, encryption: &str) -> Result<()>;

    /// Get the ID of the own key, if one is stored.
    async fn own_key(&self, encryption: &str) -> Result<Option<KeyId>>;

    /// Add keys of a key owner, overwriting the trust level of keys that are
    /// already stored.
    ///
    /// # Arguments
    ///
    /// * `owner_jid` - The bare JID of the key owner.
    ///
    /// * `key_ids` - The IDs of the keys.
    ///
    /// * `trust_level` - The trust level of the keys, usually
    ///   [`TrustLevel::default_for_new_keys()`]. Adding keys as
    ///   [`TrustLevel::Undecided`] removes them.
    async fn add_keys(
        &self,
        encryption: &str,
        owner_jid: &str,
        key_ids: &[KeyId],
        trust_level: TrustLevel,
    ) -> Result<()>;

    /// Remove the keys with the given IDs, regardless of their owner.
    async fn remove_keys(&self, encryption: &str, key_ids: &[KeyId]) -> Result<()>;

    /// Remove all keys of a key owner.
    async fn remove_keys_of_owner(&self, encryption: &str, owner_jid: &str) -> Result<()>;

    /// Remove all keys of an encryption protocol.
    async fn remove_all_keys(&self, encryption: &str) -> Result<()>;

    /// Get the stored keys grouped by trust level.
    ///
    /// An empty `trust_levels` set returns keys of all trust levels.
    async fn keys(&self, encryption: &str, trust_levels: TrustLevels) -> Result<KeysByTrustLevel>;

    /// Get the stored keys of the given key owners with their trust levels.
    ///
    /// An empty `owner_jids` list returns keys of all owners, an empty
    /// `trust_levels` set returns keys of all trust levels. Owners without
    /// matching keys are left out.
    async fn keys_of_owners(
        &self,
        encryption: &str,
        owner_jids: &[String],
        trust_levels: TrustLevels,
    ) -> Result<TrustLevelsByOwner>;

    /// Does the key owner have any key with one of the given trust levels.
    async fn has_key(
        &self,
        encryption: &str,
        owner_jid: &str,
        trust_levels: TrustLevels,
    ) -> Result<bool>;

    /// Set the trust level of keys, creating records for unknown keys.
    ///
    /// Returns the keys whose trust level actually changed.
    async fn set_trust_level(
        &self,
        encryption: &str,
        keys: &KeysByOwner,
        trust_level: TrustLevel,
    ) -> Result<KeysByOwner>;

    /// Move all keys of the given owners from one trust level to another.
    ///
    /// Returns the keys whose trust level changed.
    async fn set_trust_level_of_owners(
        &self,
        encryption: &str,
        owner_jids: &[String],
        old_trust_level: TrustLevel,
        new_trust_level: TrustLevel,
    ) -> Result<KeysByOwner>;

    /// Get the trust level of a key, [`TrustLevel::Undecided`] if the key is
    /// unknown.
    async fn trust_level(
        &self,
        encryption: &str,
        owner_jid: &str,
        key_id: &KeyId,
    ) -> Result<TrustLevel>;

    /// Remove all the trust data of an encryption protocol.
    async fn reset_all(&self, encryption: &str) -> Result<()>;
}

/// A [`TrustStorage`] that additionally stores the data Automatic Trust
/// Management needs: trust decisions received from senders whose keys aren't
/// authenticated yet.
///
/// A postponed decision is identified by the key it is about, the owner of
/// that key and the key of the sender. It becomes actionable once the sender
/// key is authenticated.
#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
pub trait AtmTrustStorage: TrustStorage {
    /// Store the trust decisions of the key owners for later.
    ///
    /// Trusted keys are stored before distrusted ones, an existing decision
    /// for the same key, owner and sender is overwritten.
    async fn add_keys_for_postponed_trust_decisions(
        &self,
        encryption: &str,
        sender_key_id: &KeyId,
        key_owners: &[KeyOwner],
    ) -> Result<()>;

    /// Remove postponed decisions for the authentication of the keys in
    /// `key_ids_for_authentication` and for the distrusting of the keys in
    /// `key_ids_for_distrusting`, regardless of their owner or sender.
    async fn remove_keys_for_postponed_trust_decisions(
        &self,
        encryption: &str,
        key_ids_for_authentication: &[KeyId],
        key_ids_for_distrusting: &[KeyId],
    ) -> Result<()>;

    /// Remove all postponed decisions made by the given sender keys.
    async fn remove_keys_for_postponed_trust_decisions_by_sender(
        &self,
        encryption: &str,
        sender_key_ids: &[KeyId],
    ) -> Result<()>;

    /// Remove all postponed decisions of an encryption protocol.
    async fn remove_all_keys_for_postponed_trust_decisions(&self, encryption: &str) -> Result<()>;

    /// Get the postponed decisions made by the given sender keys.
    ///
    /// An empty `sender_key_ids` list returns all postponed decisions.
    async fn keys_for_postponed_trust_decisions(
        &self,
        encryption: &str,
        sender_key_ids: &[KeyId],
    ) -> Result<PostponedTrustDecisions>;
}

/// A type that can be type-erased into `Arc<dyn TrustStorage>`.
///
/// This trait is not meant to be implemented directly outside `xmpp-trust`,
/// but it is automatically implemented for everything that implements
/// `TrustStorage`.
pub trait IntoTrustStorage {
    #[doc(hidden)]
    fn into_trust_storage(self) -> Arc<dyn TrustStorage>;
}

impl<T> IntoTrustStorage for T
where
    T: TrustStorage + 'static,
{
    fn into_trust_storage(self) -> Arc<dyn TrustStorage> {
        Arc::new(self)
    }
}

impl<T> IntoTrustStorage for Arc<T>
where
    T: TrustStorage + 'static,
{
    fn into_trust_storage(self) -> Arc<dyn TrustStorage> {
        self
    }
}

impl IntoTrustStorage for Arc<dyn TrustStorage> {
    fn into_trust_storage(self) -> Arc<dyn TrustStorage> {
        self
    }
}

impl IntoTrustStorage for Arc<dyn AtmTrustStorage> {
    fn into_trust_storage(self) -> Arc<dyn TrustStorage> {
        self
    }
}

/// A type that can be type-erased into `Arc<dyn AtmTrustStorage>`.
///
/// Automatically implemented for everything that implements
/// `AtmTrustStorage`.
pub trait IntoAtmTrustStorage {
    #[doc(hidden)]
    fn into_atm_trust_storage(self) -> Arc<dyn AtmTrustStorage>;
}

impl<T> IntoAtmTrustStorage for T
where
    T: AtmTrustStorage + 'static,
{
    fn into_atm_trust_storage(self) -> Arc<dyn AtmTrustStorage> {
        Arc::new(self)
    }
}

impl<T> IntoAtmTrustStorage for Arc<T>
where
    T: AtmTrustStorage + 'static,
{
    fn into_atm_trust_storage(self) -> Arc<dyn AtmTrustStorage> {
        self
    }
}

impl IntoAtmTrustStorage for Arc<dyn AtmTrustStorage> {
    fn into_atm_trust_storage(self) -> Arc<dyn AtmTrustStorage> {
        self
    }
}
