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

use std::{
    collections::{BTreeMap, HashMap},
    future,
    sync::Arc,
};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, instrument, warn};
use xmpp_trust_common::locks::Mutex as StdMutex;

use crate::{
    store::{IntoTrustStorage, KeysByTrustLevel, Result, TrustLevelsByOwner, TrustStorage},
    types::{KeyId, KeysByOwner, SecurityPolicy, TrustLevel, TrustLevels},
};

/// Keys whose trust levels changed, grouped by the namespace of their
/// encryption protocol and by their owner.
pub type TrustLevelsChanged = BTreeMap<String, KeysByOwner>;

/// One async lock per encryption namespace.
///
/// Mutations of the trust data of a namespace are serialized through its
/// lock, different namespaces don't block each other.
#[derive(Debug, Default)]
pub(crate) struct NamespaceLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamespaceLocks {
    pub(crate) async fn lock(&self, encryption: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(encryption.to_owned()).or_default().clone();
        lock.lock_owned().await
    }
}

#[derive(Debug)]
struct TrustManagerInner {
    store: Arc<dyn TrustStorage>,
    locks: NamespaceLocks,
    /// The sender side of a broadcast stream that is notified whenever the
    /// trust level of a key changes.
    trust_levels_changed_sender: broadcast::Sender<TrustLevelsChanged>,
}

/// Manages the trust levels of end-to-end encryption keys.
///
/// The `TrustManager` is a thin layer over a [`TrustStorage`]. It serializes
/// the modifications per encryption namespace and notifies listeners of
/// [`TrustManager::trust_levels_changed_stream()`] about keys whose trust
/// level changed.
#[derive(Clone, Debug)]
pub struct TrustManager {
    inner: Arc<TrustManagerInner>,
}

impl TrustManager {
    /// Create a new `TrustManager` on top of the given store.
    pub fn new(store: impl IntoTrustStorage) -> Self {
        let trust_levels_changed_sender = broadcast::Sender::new(10);

        Self {
            inner: Arc::new(TrustManagerInner {
                store: store.into_trust_storage(),
                locks: NamespaceLocks::default(),
                trust_levels_changed_sender,
            }),
        }
    }

    /// The store this manager operates on.
    pub fn store(&self) -> &Arc<dyn TrustStorage> {
        &self.inner.store
    }

    pub(crate) fn locks(&self) -> &NamespaceLocks {
        &self.inner.locks
    }

    /// Set the security policy of an encryption protocol.
    pub async fn set_security_policy(
        &self,
        encryption: &str,
        policy: SecurityPolicy,
    ) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.set_security_policy(encryption, policy).await
    }

    /// Reset the security policy of an encryption protocol.
    pub async fn reset_security_policy(&self, encryption: &str) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.reset_security_policy(encryption).await
    }

    /// Get the security policy of an encryption protocol.
    pub async fn security_policy(&self, encryption: &str) -> Result<SecurityPolicy> {
        self.inner.store.security_policy(encryption).await
    }

    /// Store the ID of the own key.
    pub async fn set_own_key(&self, encryption: &str, key_id: KeyId) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.set_own_key(encryption, key_id).await
    }

    /// Forget the ID of the own key.
    pub async fn reset_own_key(&self, encryption: &str) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.reset_own_key(encryption).await
    }

    /// Get the ID of the own key.
    pub async fn own_key(&self, encryption: &str) -> Result<Option<KeyId>> {
        self.inner.store.own_key(encryption).await
    }

    /// Add keys of a key owner with the given trust level.
    ///
    /// No change notification is sent, newly discovered keys aren't trust
    /// decisions.
    pub async fn add_keys(
        &self,
        encryption: &str,
        owner_jid: &str,
        key_ids: &[KeyId],
        trust_level: TrustLevel,
    ) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.add_keys(encryption, owner_jid, key_ids, trust_level).await
    }

    /// Remove keys by their IDs.
    pub async fn remove_keys(&self, encryption: &str, key_ids: &[KeyId]) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.remove_keys(encryption, key_ids).await
    }

    /// Remove all keys of a key owner.
    pub async fn remove_keys_of_owner(&self, encryption: &str, owner_jid: &str) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.remove_keys_of_owner(encryption, owner_jid).await
    }

    /// Remove all keys of an encryption protocol.
    pub async fn remove_all_keys(&self, encryption: &str) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.remove_all_keys(encryption).await
    }

    /// Get the keys with the given trust levels, an empty set means all
    /// levels.
    pub async fn keys(
        &self,
        encryption: &str,
        trust_levels: TrustLevels,
    ) -> Result<KeysByTrustLevel> {
        self.inner.store.keys(encryption, trust_levels).await
    }

    /// Get the keys of the given owners, an empty list means all owners.
    pub async fn keys_of_owners(
        &self,
        encryption: &str,
        owner_jids: &[String],
        trust_levels: TrustLevels,
    ) -> Result<TrustLevelsByOwner> {
        self.inner.store.keys_of_owners(encryption, owner_jids, trust_levels).await
    }

    /// Does the key owner have a key with one of the given trust levels.
    pub async fn has_key(
        &self,
        encryption: &str,
        owner_jid: &str,
        trust_levels: TrustLevels,
    ) -> Result<bool> {
        self.inner.store.has_key(encryption, owner_jid, trust_levels).await
    }

    /// Set the trust level of keys.
    ///
    /// Listeners are notified about the keys whose trust level changed.
    pub async fn set_trust_level(
        &self,
        encryption: &str,
        keys: &KeysByOwner,
        trust_level: TrustLevel,
    ) -> Result<KeysByOwner> {
        let _guard = self.locks().lock(encryption).await;
        self.set_trust_level_unlocked(encryption, keys, trust_level).await
    }

    /// Move the keys of the given owners from one trust level to another.
    ///
    /// Listeners are notified about the keys whose trust level changed.
    pub async fn set_trust_level_of_owners(
        &self,
        encryption: &str,
        owner_jids: &[String],
        old_trust_level: TrustLevel,
        new_trust_level: TrustLevel,
    ) -> Result<KeysByOwner> {
        let _guard = self.locks().lock(encryption).await;
        self.set_trust_level_of_owners_unlocked(
            encryption,
            owner_jids,
            old_trust_level,
            new_trust_level,
        )
        .await
    }

    /// Get the trust level of a key.
    pub async fn trust_level(
        &self,
        encryption: &str,
        owner_jid: &str,
        key_id: &KeyId,
    ) -> Result<TrustLevel> {
        self.inner.store.trust_level(encryption, owner_jid, key_id).await
    }

    /// Remove all the trust data of an encryption protocol.
    pub async fn reset_all(&self, encryption: &str) -> Result<()> {
        let _guard = self.locks().lock(encryption).await;
        self.inner.store.reset_all(encryption).await
    }

    /// Receive notifications about keys whose trust level changed as a
    /// [`Stream`].
    ///
    /// Every call to [`TrustManager::set_trust_level()`] or
    /// [`TrustManager::set_trust_level_of_owners()`] that changed at least one
    /// key produces one item. Keys set by the ATM engine are reported as well.
    ///
    /// If the reader of the stream lags too far behind, a warning will be
    /// logged and items will be dropped.
    pub fn trust_levels_changed_stream(&self) -> impl Stream<Item = TrustLevelsChanged> + use<> {
        let stream = BroadcastStream::new(self.inner.trust_levels_changed_sender.subscribe());

        stream.filter_map(|result| {
            future::ready(match result {
                Ok(changes) => Some(changes),
                Err(BroadcastStreamRecvError::Lagged(lag)) => {
                    warn!("trust_levels_changed_stream missed {lag} updates");
                    None
                }
            })
        })
    }

    /// [`TrustManager::set_trust_level()`] for callers already holding the
    /// namespace lock.
    #[instrument(skip(self, keys))]
    pub(crate) async fn set_trust_level_unlocked(
        &self,
        encryption: &str,
        keys: &KeysByOwner,
        trust_level: TrustLevel,
    ) -> Result<KeysByOwner> {
        let changed = self.inner.store.set_trust_level(encryption, keys, trust_level).await?;
        self.notify_changes(encryption, &changed);
        Ok(changed)
    }

    /// [`TrustManager::set_trust_level_of_owners()`] for callers already
    /// holding the namespace lock.
    #[instrument(skip(self))]
    pub(crate) async fn set_trust_level_of_owners_unlocked(
        &self,
        encryption: &str,
        owner_jids: &[String],
        old_trust_level: TrustLevel,
        new_trust_level: TrustLevel,
    ) -> Result<KeysByOwner> {
        let changed = self
            .inner
            .store
            .set_trust_level_of_owners(encryption, owner_jids, old_trust_level, new_trust_level)
            .await?;
        self.notify_changes(encryption, &changed);
        Ok(changed)
    }

    fn notify_changes(&self, encryption: &str, changed: &KeysByOwner) {
        if changed.is_empty() {
            return;
        }

        debug!(?changed, "Trust levels changed");

        let changes = TrustLevelsChanged::from([(encryption.to_owned(), changed.clone())]);
        // A send error only means that nobody is listening.
        let _ = self.inner.trust_levels_changed_sender.send(changes);
    }
}
