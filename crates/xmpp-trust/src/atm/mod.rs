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

//! Automatic Trust Management (XEP-0450).
//!
//! When the user authenticates or distrusts keys, the [`AtmManager`] informs
//! the other endpoints with authenticated keys via trust messages. Trust
//! messages received from endpoints with authenticated keys are applied
//! directly, those from endpoints whose keys aren't authenticated yet are
//! postponed until the sender key gets authenticated.

use std::{ops::Deref, sync::Arc};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};
use xmpp_trust_common::BoxFuture;

use crate::{
    error::AtmResult,
    store::{AtmTrustStorage, IntoAtmTrustStorage},
    transport::{Message, SendStanzaParams, Transport, TransportError},
    trust_message::{KeyOwner, TrustMessageElement, TrustMessageUri},
    types::{
        all_key_ids, contains_key, insert_key, KeyId, KeysByOwner, SecurityPolicy, TrustLevel,
        TrustLevels,
    },
    utilities::bare_jid,
    TrustManager,
};


/// Settings of the [`AtmManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmSettings {
    /// Trust messages are only encrypted for devices whose keys have one of
    /// these trust levels.
    pub accepted_trust_levels: TrustLevels,
}

impl Default for AtmSettings {
    fn default() -> Self {
        Self { accepted_trust_levels: TrustLevels::AUTHENTICATED }
    }
}

/// The Automatic Trust Management engine.
///
/// The `AtmManager` dereferences to the [`TrustManager`] it uses, so all the
/// plain trust management methods are available on it as well.
#[derive(Clone, Debug)]
pub struct AtmManager {
    trust_manager: TrustManager,
    store: Arc<dyn AtmTrustStorage>,
    transport: Arc<dyn Transport>,
    settings: AtmSettings,
}

impl AtmManager {
    /// Create a new `AtmManager` with the default settings.
    pub fn new(store: impl IntoAtmTrustStorage, transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(store, transport, AtmSettings::default())
    }

    /// Create a new `AtmManager`.
    ///
    /// # Arguments
    ///
    /// * `store` - The store for the trust data and postponed trust
    ///   decisions.
    ///
    /// * `transport` - The client used to send trust messages.
    ///
    /// * `settings` - The settings of the engine.
    pub fn with_settings(
        store: impl IntoAtmTrustStorage,
        transport: Arc<dyn Transport>,
        settings: AtmSettings,
    ) -> Self {
        let store = store.into_atm_trust_storage();
        let trust_manager = TrustManager::new(store.clone());

        Self { trust_manager, store, transport, settings }
    }

    /// The underlying [`TrustManager`].
    pub fn trust_manager(&self) -> &TrustManager {
        &self.trust_manager
    }

    /// The settings of the engine.
    pub fn settings(&self) -> &AtmSettings {
        &self.settings
    }

    fn own_bare_jid(&self) -> String {
        bare_jid(&self.transport.own_jid()).to_owned()
    }

    /// Authenticate or distrust keys of a key owner and inform the other
    /// endpoints about it.
    ///
    /// Keys that already have the requested trust level are skipped, nothing
    /// happens if no key is left.
    ///
    /// # Arguments
    ///
    /// * `encryption` - The namespace of the encryption protocol.
    ///
    /// * `key_owner_jid` - The bare JID of the key owner.
    ///
    /// * `key_ids_for_authentication` - The IDs of the keys to authenticate.
    ///
    /// * `key_ids_for_distrusting` - The IDs of the keys to distrust.
    #[instrument(skip(self, key_ids_for_authentication, key_ids_for_distrusting))]
    pub async fn make_trust_decisions(
        &self,
        encryption: &str,
        key_owner_jid: &str,
        key_ids_for_authentication: &[KeyId],
        key_ids_for_distrusting: &[KeyId],
    ) -> AtmResult<()> {
        let guard = self.trust_manager.locks().lock(encryption).await;

        let key_owner_jid = bare_jid(key_owner_jid);
        let own_jid = self.own_bare_jid();

        let mut keys = self
            .store
            .keys(encryption, TrustLevels::AUTHENTICATED | TrustLevels::MANUALLY_DISTRUSTED)
            .await?;
        let authenticated_keys = keys.remove(&TrustLevel::Authenticated).unwrap_or_default();
        let manually_distrusted_keys =
            keys.remove(&TrustLevel::ManuallyDistrusted).unwrap_or_default();

        let modified_authenticated_keys: Vec<KeyId> = key_ids_for_authentication
            .iter()
            .filter(|key_id| !contains_key(&authenticated_keys, key_owner_jid, key_id))
            .unique()
            .cloned()
            .collect();
        let modified_distrusted_keys: Vec<KeyId> = key_ids_for_distrusting
            .iter()
            .filter(|key_id| !contains_key(&manually_distrusted_keys, key_owner_jid, key_id))
            .unique()
            .cloned()
            .collect();

        if modified_authenticated_keys.is_empty() && modified_distrusted_keys.is_empty() {
            debug!("All keys already have the requested trust levels");
            return Ok(());
        }

        let keys_being_authenticated = keys_of_owner(key_owner_jid, &modified_authenticated_keys);
        let keys_being_distrusted = keys_of_owner(key_owner_jid, &modified_distrusted_keys);

        let key_owner = KeyOwner::with_keys(
            key_owner_jid,
            modified_authenticated_keys,
            modified_distrusted_keys,
        );

        let own_authenticated_keys = owner_key_ids(&authenticated_keys, &own_jid);
        let own_key_owner = KeyOwner::with_keys(
            &own_jid,
            own_authenticated_keys.clone(),
            owner_key_ids(&manually_distrusted_keys, &own_jid),
        );

        // The trust messages are built from the state before the decisions
        // are committed and sent after the namespace lock is released.
        let mut outgoing: Vec<(String, Vec<KeyOwner>)> = Vec::new();

        if key_owner_jid == own_jid {
            let contacts_authenticated_keys = without_owner(authenticated_keys, &own_jid);

            // Own endpoints with authenticated keys receive these via message
            // carbons.
            for contact_jid in contacts_authenticated_keys.keys() {
                outgoing.push((contact_jid.clone(), vec![key_owner.clone()]));
            }

            if !self.transport.carbons_enabled()
                || (contacts_authenticated_keys.is_empty() && !own_authenticated_keys.is_empty())
            {
                outgoing.push((own_jid.clone(), vec![key_owner.clone()]));
            }

            // Own endpoints whose keys were just authenticated need to catch
            // up with all the existing trust decisions.
            if !key_owner.trusted_keys().is_empty() {
                let contacts_distrusted_keys = without_owner(manually_distrusted_keys, &own_jid);

                let mut key_owners: Vec<KeyOwner> = contacts_distrusted_keys
                    .keys()
                    .merge(contacts_authenticated_keys.keys())
                    .dedup()
                    .map(|contact_jid| {
                        KeyOwner::with_keys(
                            contact_jid,
                            owner_key_ids(&contacts_authenticated_keys, contact_jid),
                            owner_key_ids(&contacts_distrusted_keys, contact_jid),
                        )
                    })
                    .collect();

                if !own_key_owner.is_empty() {
                    key_owners.push(own_key_owner);
                }

                if !key_owners.is_empty() {
                    outgoing.push((own_jid.clone(), key_owners));
                }
            }
        } else {
            if !own_authenticated_keys.is_empty() {
                outgoing.push((own_jid.clone(), vec![key_owner.clone()]));
            }

            // The contact's endpoints whose keys were just authenticated
            // learn about the own trust decisions.
            if !key_owner.trusted_keys().is_empty() && !own_key_owner.is_empty() {
                outgoing.push((key_owner_jid.to_owned(), vec![own_key_owner]));
            }
        }

        self.propagate(encryption, keys_being_authenticated, keys_being_distrusted).await?;
        drop(guard);

        for (recipient_jid, key_owners) in outgoing {
            self.send_trust_message_logged(encryption, key_owners, &recipient_jid).await;
        }

        Ok(())
    }

    /// Authenticate or distrust keys as requested by a trust message URI,
    /// e.g. one scanned from a QR code.
    ///
    /// See [`AtmManager::make_trust_decisions()`].
    pub async fn make_trust_decisions_from_uri(&self, uri: &str) -> AtmResult<()> {
        let uri = TrustMessageUri::parse(uri)?;

        self.make_trust_decisions(
            &uri.encryption,
            &uri.jid,
            &uri.trust_key_ids,
            &uri.distrust_key_ids,
        )
        .await
    }

    /// Process a received message.
    ///
    /// Messages without a trust message element for Automatic Trust
    /// Management are ignored, so are the own trust messages reflected via
    /// message carbons.
    ///
    /// A sender may make trust decisions for its own keys, an own endpoint
    /// additionally for the keys of contacts. The decisions are applied if the
    /// sender key is authenticated, otherwise they are stored until it is.
    #[instrument(skip_all, fields(sender = %message.from))]
    pub async fn handle_message(&self, message: &Message) -> AtmResult<()> {
        let Some(element) = message.trust_message_element() else {
            return Ok(());
        };

        if !element.is_atm() {
            trace!(usage = element.usage(), "Ignoring a trust message with a foreign usage");
            return Ok(());
        }

        if message.from == self.transport.own_jid() {
            trace!("Ignoring an own trust message reflected via message carbons");
            return Ok(());
        }

        let encryption = element.encryption();
        let sender_jid = bare_jid(&message.from);
        let sender_key = message.sender_key();

        let _guard = self.trust_manager.locks().lock(encryption).await;

        let is_sender_key_authenticated = self
            .store
            .trust_level(encryption, sender_jid, &sender_key)
            .await?
            == TrustLevel::Authenticated;
        let is_own_trust_message = sender_jid == self.own_bare_jid();

        let mut keys_being_authenticated = KeysByOwner::new();
        let mut keys_being_distrusted = KeysByOwner::new();
        let mut key_owners_for_postponed_trust_decisions = Vec::new();

        for key_owner in element.key_owners() {
            // Contacts may only make decisions about their own keys.
            if !is_own_trust_message && sender_jid != key_owner.jid() {
                debug!(
                    key_owner = key_owner.jid(),
                    "Ignoring trust decisions the sender isn't qualified to make"
                );
                continue;
            }

            if is_sender_key_authenticated {
                for key_id in key_owner.trusted_keys() {
                    insert_key(&mut keys_being_authenticated, key_owner.jid(), key_id.clone());
                }

                for key_id in key_owner.distrusted_keys() {
                    insert_key(&mut keys_being_distrusted, key_owner.jid(), key_id.clone());
                }
            } else {
                key_owners_for_postponed_trust_decisions.push(key_owner.clone());
            }
        }

        if !key_owners_for_postponed_trust_decisions.is_empty() {
            debug!(
                sender_key = %sender_key,
                "Postponing trust decisions until the sender key is authenticated"
            );
        }

        self.store
            .add_keys_for_postponed_trust_decisions(
                encryption,
                &sender_key,
                &key_owners_for_postponed_trust_decisions,
            )
            .await?;

        self.propagate(encryption, keys_being_authenticated, keys_being_distrusted).await
    }

    /// Send a trust message for Automatic Trust Management.
    ///
    /// The message is only encrypted for devices whose keys have one of the
    /// accepted trust levels of the [`AtmSettings`].
    pub async fn send_trust_message(
        &self,
        encryption: &str,
        key_owners: Vec<KeyOwner>,
        recipient_jid: &str,
    ) -> Result<(), TransportError> {
        let element = TrustMessageElement::atm(encryption, key_owners);
        let message = Message::with_trust_message(recipient_jid, element);
        let params =
            SendStanzaParams { accepted_trust_levels: self.settings.accepted_trust_levels };

        self.transport.send_sensitive(message, params).await
    }

    async fn send_trust_message_logged(
        &self,
        encryption: &str,
        key_owners: Vec<KeyOwner>,
        recipient_jid: &str,
    ) {
        trace!(recipient_jid, "Sending a trust message");

        if let Err(error) = self.send_trust_message(encryption, key_owners, recipient_jid).await {
            warn!(recipient_jid, ?error, "Failed to send a trust message");
        }
    }

    /// Authenticate and distrust keys, and apply the postponed decisions that
    /// became actionable.
    fn propagate<'a>(
        &'a self,
        encryption: &'a str,
        keys_being_authenticated: KeysByOwner,
        keys_being_distrusted: KeysByOwner,
    ) -> BoxFuture<'a, AtmResult<()>> {
        Box::pin(async move {
            self.authenticate(encryption, &keys_being_authenticated).await?;
            self.distrust(encryption, &keys_being_distrusted).await
        })
    }

    async fn authenticate(&self, encryption: &str, keys: &KeysByOwner) -> AtmResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        self.trust_manager
            .set_trust_level_unlocked(encryption, keys, TrustLevel::Authenticated)
            .await?;

        if self.store.security_policy(encryption).await? == SecurityPolicy::Toakafa {
            let owner_jids: Vec<String> = keys.keys().cloned().collect();
            self.distrust_automatically_trusted_keys(encryption, &owner_jids).await?;
        }

        self.make_postponed_trust_decisions(encryption, &all_key_ids(keys)).await
    }

    async fn distrust(&self, encryption: &str, keys: &KeysByOwner) -> AtmResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        self.trust_manager
            .set_trust_level_unlocked(encryption, keys, TrustLevel::ManuallyDistrusted)
            .await?;

        // Decisions made by distrusted keys must never be applied.
        self.store
            .remove_keys_for_postponed_trust_decisions_by_sender(encryption, &all_key_ids(keys))
            .await?;

        Ok(())
    }

    async fn distrust_automatically_trusted_keys(
        &self,
        encryption: &str,
        owner_jids: &[String],
    ) -> AtmResult<()> {
        self.trust_manager
            .set_trust_level_of_owners_unlocked(
                encryption,
                owner_jids,
                TrustLevel::AutomaticallyTrusted,
                TrustLevel::AutomaticallyDistrusted,
            )
            .await?;

        Ok(())
    }

    async fn make_postponed_trust_decisions(
        &self,
        encryption: &str,
        sender_key_ids: &[KeyId],
    ) -> AtmResult<()> {
        let decisions =
            self.store.keys_for_postponed_trust_decisions(encryption, sender_key_ids).await?;

        if decisions.is_empty() {
            return Ok(());
        }

        trace!(?decisions, "Applying postponed trust decisions");

        self.store
            .remove_keys_for_postponed_trust_decisions(
                encryption,
                &all_key_ids(&decisions.trusted),
                &all_key_ids(&decisions.distrusted),
            )
            .await?;

        self.propagate(encryption, decisions.trusted, decisions.distrusted).await
    }
}

impl Deref for AtmManager {
    type Target = TrustManager;

    fn deref(&self) -> &Self::Target {
        &self.trust_manager
    }
}

fn keys_of_owner(owner_jid: &str, key_ids: &[KeyId]) -> KeysByOwner {
    let mut keys = KeysByOwner::new();

    for key_id in key_ids {
        insert_key(&mut keys, owner_jid, key_id.clone());
    }

    keys
}

fn owner_key_ids(keys: &KeysByOwner, owner_jid: &str) -> Vec<KeyId> {
    keys.get(owner_jid).into_iter().flatten().cloned().collect()
}

fn without_owner(mut keys: KeysByOwner, owner_jid: &str) -> KeysByOwner {
    keys.remove(owner_jid);
    keys
}
