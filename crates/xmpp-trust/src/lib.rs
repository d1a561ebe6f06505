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

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

mod atm;
mod error;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
mod trust_manager;
pub mod trust_message;
mod types;
mod utilities;

pub use atm::{AtmManager, AtmSettings};
pub use error::{AtmError, AtmResult};
pub use transport::{E2eeMetadata, Message, SendStanzaParams, Transport, TransportError};
pub use trust_manager::{TrustLevelsChanged, TrustManager};
pub use trust_message::{
    KeyOwner, TrustMessageElement, TrustMessageUri, NS_ATM, NS_OMEMO_2, NS_TM,
};
pub use types::{KeyId, KeysByOwner, SecurityPolicy, TrustLevel, TrustLevels};
pub use utilities::bare_jid;

#[cfg(test)]
#[ctor::ctor]
fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .init();
}
