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

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use xmpp_trust_common::locks::RwLock as StdRwLock;

use super::{
    AtmTrustStorage, KeysByTrustLevel, PostponedTrustDecisions, Result, TrustLevelsByOwner,
    TrustStorage,
};
use crate::{
    trust_message::KeyOwner,
    types::{insert_key, KeyId, KeysByOwner, SecurityPolicy, TrustLevel, TrustLevels},
};

/// Map of owner JID to map of key ID to trust level.
type KeyMap = BTreeMap<String, BTreeMap<KeyId, TrustLevel>>;

/// A postponed trust decision is unique per key, key owner and sender key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PostponedKey {
    key_id: KeyId,
    owner_jid: String,
    sender_key_id: KeyId,
}

/// An in-memory only store that will forget all the trust data once it's
/// dropped.
#[derive(Default, Debug)]
pub struct MemoryStore {
    security_policies: StdRwLock<HashMap<String, SecurityPolicy>>,
    own_keys: StdRwLock<HashMap<String, KeyId>>,
    // Map of encryption to map of owner JID to map of key ID to trust level
    keys: StdRwLock<HashMap<String, KeyMap>>,
    // Map of encryption to postponed decision to the trust flag of the decision
    postponed_keys: StdRwLock<HashMap<String, BTreeMap<PostponedKey, bool>>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    fn update_level(
        keys: &mut KeyMap,
        owner_jid: &str,
        key_id: &KeyId,
        trust_level: TrustLevel,
    ) -> bool {
        if trust_level == TrustLevel::Undecided {
            let Some(owner_keys) = keys.get_mut(owner_jid) else {
                return false;
            };

            let removed = owner_keys.remove(key_id).is_some();

            if owner_keys.is_empty() {
                keys.remove(owner_jid);
            }

            removed
        } else {
            let previous = keys
                .entry(owner_jid.to_owned())
                .or_default()
                .insert(key_id.clone(), trust_level);

            previous != Some(trust_level)
        }
    }
}

#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
impl TrustStorage for MemoryStore {
    async fn set_security_policy(&self, encryption: &str, policy: SecurityPolicy) -> Result<()> {
        let mut policies = self.security_policies.write();

        if policy == SecurityPolicy::NoSecurityPolicy {
            policies.remove(encryption);
        } else {
            policies.insert(encryption.to_owned(), policy);
        }

        Ok(())
    }

    async fn reset_security_policy(&self, encryption: &str) -> Result<()> {
        self.security_policies.write().remove(encryption);
        Ok(())
    }

    async fn security_policy(&self, encryption: &str) -> Result<SecurityPolicy> {
        Ok(self.security_policies.read().get(encryption).copied().unwrap_or_default())
    }

    async fn set_own_key(&self, encryption: &str, key_id: KeyId) -> Result<()> {
        self.own_keys.write().insert(encryption.to_owned(), key_id);
        Ok(())
    }

    async fn reset_own_key(&self, encryption: &str) -> Result<()> {
        self.own_keys.write().remove(encryption);
        Ok(())
    }

    async fn own_key(&self, encryption: &str) -> Result<Option<KeyId>> {
        Ok(self.own_keys.read().get(encryption).cloned())
    }

    async fn add_keys(
        &self,
        encryption: &str,
        owner_jid: &str,
        key_ids: &[KeyId],
        trust_level: TrustLevel,
    ) -> Result<()> {
        let mut keys = self.keys.write();
        let keys = keys.entry(encryption.to_owned()).or_default();

        for key_id in key_ids {
            Self::update_level(keys, owner_jid, key_id, trust_level);
        }

        Ok(())
    }

    async fn remove_keys(&self, encryption: &str, key_ids: &[KeyId]) -> Result<()> {
        if let Some(keys) = self.keys.write().get_mut(encryption) {
            keys.retain(|_, owner_keys| {
                owner_keys.retain(|key_id, _| !key_ids.contains(key_id));
                !owner_keys.is_empty()
            });
        }

        Ok(())
    }

    async fn remove_keys_of_owner(&self, encryption: &str, owner_jid: &str) -> Result<()> {
        if let Some(keys) = self.keys.write().get_mut(encryption) {
            keys.remove(owner_jid);
        }

        Ok(())
    }

    async fn remove_all_keys(&self, encryption: &str) -> Result<()> {
        self.keys.write().remove(encryption);
        Ok(())
    }

    async fn keys(&self, encryption: &str, trust_levels: TrustLevels) -> Result<KeysByTrustLevel> {
        let mut result = KeysByTrustLevel::new();

        if let Some(keys) = self.keys.read().get(encryption) {
            for (owner_jid, owner_keys) in keys {
                for (key_id, trust_level) in owner_keys {
                    if trust_level.matches(trust_levels) {
                        insert_key(
                            result.entry(*trust_level).or_default(),
                            owner_jid,
                            key_id.clone(),
                        );
                    }
                }
            }
        }

        Ok(result)
    }

    async fn keys_of_owners(
        &self,
        encryption: &str,
        owner_jids: &[String],
        trust_levels: TrustLevels,
    ) -> Result<TrustLevelsByOwner> {
        let mut result = TrustLevelsByOwner::new();

        if let Some(keys) = self.keys.read().get(encryption) {
            let owners = keys
                .iter()
                .filter(|(owner_jid, _)| owner_jids.is_empty() || owner_jids.contains(*owner_jid));

            for (owner_jid, owner_keys) in owners {
                let matching: BTreeMap<_, _> = owner_keys
                    .iter()
                    .filter(|(_, trust_level)| trust_level.matches(trust_levels))
                    .map(|(key_id, trust_level)| (key_id.clone(), *trust_level))
                    .collect();

                if !matching.is_empty() {
                    result.insert(owner_jid.clone(), matching);
                }
            }
        }

        Ok(result)
    }

    async fn has_key(
        &self,
        encryption: &str,
        owner_jid: &str,
        trust_levels: TrustLevels,
    ) -> Result<bool> {
        Ok(self
            .keys
            .read()
            .get(encryption)
            .and_then(|keys| keys.get(owner_jid))
            .is_some_and(|owner_keys| {
                owner_keys.values().any(|trust_level| trust_level.matches(trust_levels))
            }))
    }

    async fn set_trust_level(
        &self,
        encryption: &str,
        keys: &KeysByOwner,
        trust_level: TrustLevel,
    ) -> Result<KeysByOwner> {
        let mut changed = KeysByOwner::new();
        let mut stored = self.keys.write();
        let stored = stored.entry(encryption.to_owned()).or_default();

        for (owner_jid, key_ids) in keys {
            for key_id in key_ids {
                if Self::update_level(stored, owner_jid, key_id, trust_level) {
                    insert_key(&mut changed, owner_jid, key_id.clone());
                }
            }
        }

        Ok(changed)
    }

    async fn set_trust_level_of_owners(
        &self,
        encryption: &str,
        owner_jids: &[String],
        old_trust_level: TrustLevel,
        new_trust_level: TrustLevel,
    ) -> Result<KeysByOwner> {
        let mut changed = KeysByOwner::new();

        if old_trust_level == new_trust_level {
            return Ok(changed);
        }

        let mut stored = self.keys.write();
        let Some(stored) = stored.get_mut(encryption) else {
            return Ok(changed);
        };

        for owner_jid in owner_jids {
            let matching: Vec<KeyId> = stored
                .get(owner_jid)
                .into_iter()
                .flatten()
                .filter(|(_, trust_level)| **trust_level == old_trust_level)
                .map(|(key_id, _)| key_id.clone())
                .collect();

            for key_id in matching {
                if Self::update_level(stored, owner_jid, &key_id, new_trust_level) {
                    insert_key(&mut changed, owner_jid, key_id);
                }
            }
        }

        Ok(changed)
    }

    async fn trust_level(
        &self,
        encryption: &str,
        owner_jid: &str,
        key_id: &KeyId,
    ) -> Result<TrustLevel> {
        Ok(self
            .keys
            .read()
            .get(encryption)
            .and_then(|keys| keys.get(owner_jid))
            .and_then(|owner_keys| owner_keys.get(key_id))
            .copied()
            .unwrap_or_default())
    }

    async fn reset_all(&self, encryption: &str) -> Result<()> {
        self.security_policies.write().remove(encryption);
        self.own_keys.write().remove(encryption);
        self.keys.write().remove(encryption);
        self.postponed_keys.write().remove(encryption);

        Ok(())
    }
}

#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
impl AtmTrustStorage for MemoryStore {
    async fn add_keys_for_postponed_trust_decisions(
        &self,
        encryption: &str,
        sender_key_id: &KeyId,
        key_owners: &[KeyOwner],
    ) -> Result<()> {
        let mut postponed = self.postponed_keys.write();
        let postponed = postponed.entry(encryption.to_owned()).or_default();

        for key_owner in key_owners {
            let decisions = key_owner
                .trusted_keys()
                .iter()
                .map(|key_id| (key_id, true))
                .chain(key_owner.distrusted_keys().iter().map(|key_id| (key_id, false)));

            for (key_id, trust) in decisions {
                let key = PostponedKey {
                    key_id: key_id.clone(),
                    owner_jid: key_owner.jid().to_owned(),
                    sender_key_id: sender_key_id.clone(),
                };

                postponed.insert(key, trust);
            }
        }

        Ok(())
    }

    async fn remove_keys_for_postponed_trust_decisions(
        &self,
        encryption: &str,
        key_ids_for_authentication: &[KeyId],
        key_ids_for_distrusting: &[KeyId],
    ) -> Result<()> {
        if let Some(postponed) = self.postponed_keys.write().get_mut(encryption) {
            postponed.retain(|key, trust| {
                let key_ids =
                    if *trust { key_ids_for_authentication } else { key_ids_for_distrusting };
                !key_ids.contains(&key.key_id)
            });
        }

        Ok(())
    }

    async fn remove_keys_for_postponed_trust_decisions_by_sender(
        &self,
        encryption: &str,
        sender_key_ids: &[KeyId],
    ) -> Result<()> {
        if let Some(postponed) = self.postponed_keys.write().get_mut(encryption) {
            postponed.retain(|key, _| !sender_key_ids.contains(&key.sender_key_id));
        }

        Ok(())
    }

    async fn remove_all_keys_for_postponed_trust_decisions(&self, encryption: &str) -> Result<()> {
        self.postponed_keys.write().remove(encryption);
        Ok(())
    }

    async fn keys_for_postponed_trust_decisions(
        &self,
        encryption: &str,
        sender_key_ids: &[KeyId],
    ) -> Result<PostponedTrustDecisions> {
        let mut decisions = PostponedTrustDecisions::default();

        if let Some(postponed) = self.postponed_keys.read().get(encryption) {
            let matching = postponed.iter().filter(|(key, _)| {
                sender_key_ids.is_empty() || sender_key_ids.contains(&key.sender_key_id)
            });

            for (key, trust) in matching {
                let keys =
                    if *trust { &mut decisions.trusted } else { &mut decisions.distrusted };
                insert_key(keys, &key.owner_jid, key.key_id.clone());
            }
        }

        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;

    async fn get_store() -> MemoryStore {
        MemoryStore::new()
    }

    trust_store_integration_tests!();
}
