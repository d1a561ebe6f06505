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

//! Types and traits to implement the storage layer for the [`TrustManager`]
//! and the [`AtmManager`].
//!
//! All the trust data is partitioned by the namespace of the encryption
//! protocol the keys belong to. An in-memory only store is provided, a
//! persistent one can be plugged in by implementing [`TrustStorage`] and
//! [`AtmTrustStorage`].
//!
//! ```
//! # use std::sync::Arc;
//! # use xmpp_trust::store::{MemoryStore, TrustStorage};
//! # use xmpp_trust::{KeyId, TrustLevel, NS_OMEMO_2};
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//!
//! let key_id = KeyId::from(b"key");
//! store
//!     .add_keys(NS_OMEMO_2, "alice@example.org", &[key_id], TrustLevel::Authenticated)
//!     .await?;
//!
//! let level = store.trust_level(NS_OMEMO_2, "alice@example.org", &KeyId::from(b"key")).await?;
//! assert_eq!(level, TrustLevel::Authenticated);
//! # Ok::<(), xmpp_trust::store::TrustStoreError>(())
//! # });
//! ```
//!
//! [`TrustManager`]: crate::TrustManager
//! [`AtmManager`]: crate::AtmManager

use std::{collections::BTreeMap, error::Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{KeyId, KeysByOwner, TrustLevel};

#[cfg(any(test, feature = "testing"))]
#[macro_use]
#[allow(missing_docs)]
pub mod integration_tests;

mod memorystore;
mod traits;

pub use memorystore::MemoryStore;
pub use traits::{AtmTrustStorage, IntoAtmTrustStorage, IntoTrustStorage, TrustStorage};

/// Trust storage specific error type.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// An error happened in the underlying database backend.
    #[error(transparent)]
    Backend(Box<dyn Error + Send + Sync>),
}

impl TrustStoreError {
    /// Create a new [`Backend`][Self::Backend] error.
    ///
    /// Shorthand for `TrustStoreError::Backend(Box::new(error))`.
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

/// A `TrustStorage` specific result type.
pub type Result<T, E = TrustStoreError> = std::result::Result<T, E>;

/// Stored keys grouped by their trust level.
pub type KeysByTrustLevel = BTreeMap<TrustLevel, KeysByOwner>;

/// Bare JIDs of key owners mapped to their keys and the trust levels of those.
pub type TrustLevelsByOwner = BTreeMap<String, BTreeMap<KeyId, TrustLevel>>;

/// The keys of postponed trust decisions, split by the decision that will be
/// made once the sender key of the decision is authenticated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostponedTrustDecisions {
    /// The keys that will be authenticated.
    pub trusted: KeysByOwner,
    /// The keys that will be distrusted.
    pub distrusted: KeysByOwner,
}

impl PostponedTrustDecisions {
    /// Are there no postponed decisions at all.
    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty() && self.distrusted.is_empty()
    }
}
