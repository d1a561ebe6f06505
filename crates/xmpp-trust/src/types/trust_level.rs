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

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The trust level of a key.
///
/// A key has exactly one trust level at any time. Keys that were never seen
/// are [`TrustLevel::Undecided`], storages don't keep records for them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustLevel {
    /// The key is unknown, no trust decision has been made for it yet.
    #[default]
    Undecided,
    /// The key is automatically distrusted (e.g., by the security policy
    /// TOAKAFA).
    AutomaticallyDistrusted,
    /// The key is manually distrusted (e.g., by clicking a button or by ATM).
    ManuallyDistrusted,
    /// The key is automatically trusted (e.g., by the client for all keys of
    /// a bare JID until one of them is authenticated).
    AutomaticallyTrusted,
    /// The key is manually trusted (e.g., by clicking a button).
    ManuallyTrusted,
    /// The key is authenticated (e.g., by QR code scanning or by ATM).
    Authenticated,
}

impl TrustLevel {
    /// All the trust levels a stored key can have, i.e. every level except
    /// [`TrustLevel::Undecided`].
    pub const STORED: [TrustLevel; 5] = [
        TrustLevel::AutomaticallyDistrusted,
        TrustLevel::ManuallyDistrusted,
        TrustLevel::AutomaticallyTrusted,
        TrustLevel::ManuallyTrusted,
        TrustLevel::Authenticated,
    ];

    /// The trust level that newly discovered keys get if nothing else is
    /// requested.
    pub const fn default_for_new_keys() -> Self {
        TrustLevel::AutomaticallyDistrusted
    }

    /// Is this level one of the trusted ones.
    pub fn is_trusted(self) -> bool {
        matches!(
            self,
            TrustLevel::AutomaticallyTrusted
                | TrustLevel::ManuallyTrusted
                | TrustLevel::Authenticated
        )
    }

    /// Does the given set of levels contain this level.
    ///
    /// An empty set matches every level.
    pub fn matches(self, levels: TrustLevels) -> bool {
        levels.is_empty() || levels.contains(self.into())
    }
}

bitflags! {
    /// A set of [`TrustLevel`]s, used to filter key queries.
    ///
    /// An empty set stands for all trust levels.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TrustLevels: u8 {
        /// See [`TrustLevel::Undecided`].
        const UNDECIDED = 1;
        /// See [`TrustLevel::AutomaticallyDistrusted`].
        const AUTOMATICALLY_DISTRUSTED = 1 << 1;
        /// See [`TrustLevel::ManuallyDistrusted`].
        const MANUALLY_DISTRUSTED = 1 << 2;
        /// See [`TrustLevel::AutomaticallyTrusted`].
        const AUTOMATICALLY_TRUSTED = 1 << 3;
        /// See [`TrustLevel::ManuallyTrusted`].
        const MANUALLY_TRUSTED = 1 << 4;
        /// See [`TrustLevel::Authenticated`].
        const AUTHENTICATED = 1 << 5;
    }
}

impl TrustLevels {
    /// The set matching every trust level.
    pub const fn any() -> Self {
        Self::empty()
    }
}

impl From<TrustLevel> for TrustLevels {
    fn from(level: TrustLevel) -> Self {
        match level {
            TrustLevel::Undecided => TrustLevels::UNDECIDED,
            TrustLevel::AutomaticallyDistrusted => TrustLevels::AUTOMATICALLY_DISTRUSTED,
            TrustLevel::ManuallyDistrusted => TrustLevels::MANUALLY_DISTRUSTED,
            TrustLevel::AutomaticallyTrusted => TrustLevels::AUTOMATICALLY_TRUSTED,
            TrustLevel::ManuallyTrusted => TrustLevels::MANUALLY_TRUSTED,
            TrustLevel::Authenticated => TrustLevels::AUTHENTICATED,
        }
    }
}

/// The security policy of an encryption protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityPolicy {
    /// New keys must be trusted manually.
    #[default]
    NoSecurityPolicy,
    /// Trust Only After Key Authentication For All.
    ///
    /// New keys are trusted automatically until the first key of their owner
    /// is authenticated, afterwards they are automatically distrusted.
    Toakafa,
}
