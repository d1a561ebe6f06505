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

//! Helpers for testing code built on top of the trust engine.

use async_trait::async_trait;
use xmpp_trust_common::locks::Mutex;

use crate::transport::{Message, SendStanzaParams, Transport, TransportError};

/// A [`Transport`] that records the sent messages instead of sending them.
#[derive(Debug)]
pub struct MockTransport {
    own_jid: String,
    carbons_enabled: bool,
    failing: Mutex<bool>,
    sent: Mutex<Vec<(Message, SendStanzaParams)>>,
}

impl MockTransport {
    /// Create a new `MockTransport` for the given full JID, with message
    /// carbons enabled.
    pub fn new(own_jid: &str) -> Self {
        Self {
            own_jid: own_jid.to_owned(),
            carbons_enabled: true,
            failing: Mutex::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Enable or disable message carbons.
    pub fn with_carbons(mut self, enabled: bool) -> Self {
        self.carbons_enabled = enabled;
        self
    }

    /// Make every following send fail with [`TransportError::Disconnected`].
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Take the messages sent so far.
    pub fn take_sent(&self) -> Vec<(Message, SendStanzaParams)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Take the messages sent so far, without the send parameters.
    pub fn take_sent_messages(&self) -> Vec<Message> {
        self.take_sent().into_iter().map(|(message, _)| message).collect()
    }
}

#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
impl Transport for MockTransport {
    fn own_jid(&self) -> String {
        self.own_jid.clone()
    }

    fn carbons_enabled(&self) -> bool {
        self.carbons_enabled
    }

    async fn send_sensitive(
        &self,
        message: Message,
        params: SendStanzaParams,
    ) -> Result<(), TransportError> {
        if *self.failing.lock() {
            return Err(TransportError::Disconnected);
        }

        self.sent.lock().push((message, params));
        Ok(())
    }
}
