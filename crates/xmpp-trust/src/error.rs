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

use thiserror::Error;

use crate::{store::TrustStoreError, trust_message::UriError};

/// Result type of the ATM engine.
pub type AtmResult<T> = Result<T, AtmError>;

/// Error representing a failure of the Automatic Trust Management engine.
///
/// Failures to send trust messages aren't reported, the trust decisions are
/// already stored at that point.
#[derive(Error, Debug)]
pub enum AtmError {
    /// The storage layer returned an error.
    #[error("failed to read or write to the trust store: {0}")]
    Store(#[from] TrustStoreError),

    /// The trust message URI couldn't be parsed.
    #[error(transparent)]
    Uri(#[from] UriError),
}
