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

//! The interface between the trust engine and the XMPP client it runs in.
//!
//! The engine neither owns a connection nor encrypts anything itself. It
//! receives decrypted [`Message`]s and hands the trust messages it produces to
//! a [`Transport`].

use std::error::Error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use xmpp_trust_common::AsyncTraitDeps;

use crate::{
    trust_message::TrustMessageElement,
    types::{KeyId, TrustLevels},
};

/// The end-to-end encryption metadata of a received message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eeMetadata {
    /// The ID of the key the sender encrypted the message with.
    pub sender_key: KeyId,
}

/// A message as far as the trust engine is concerned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The full JID of the sender.
    pub from: String,
    /// The JID of the recipient.
    pub to: String,
    /// The trust message element carried by the message, if any.
    pub trust_message_element: Option<TrustMessageElement>,
    /// The end-to-end encryption metadata, absent for unencrypted messages.
    pub e2ee_metadata: Option<E2eeMetadata>,
}

impl Message {
    /// Create a message to the given recipient carrying a trust message
    /// element.
    pub fn with_trust_message(to: &str, element: TrustMessageElement) -> Self {
        Self { to: to.to_owned(), trust_message_element: Some(element), ..Default::default() }
    }

    /// The trust message element of the message.
    pub fn trust_message_element(&self) -> Option<&TrustMessageElement> {
        self.trust_message_element.as_ref()
    }

    /// The end-to-end encryption metadata of the message.
    pub fn e2ee_metadata(&self) -> Option<&E2eeMetadata> {
        self.e2ee_metadata.as_ref()
    }

    /// The ID of the key the message was encrypted with, an empty key ID for
    /// unencrypted messages.
    pub fn sender_key(&self) -> KeyId {
        self.e2ee_metadata.as_ref().map(|metadata| metadata.sender_key.clone()).unwrap_or_default()
    }
}

/// Parameters for sending a sensitive stanza.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendStanzaParams {
    /// The stanza may only be encrypted for devices whose keys have one of
    /// these trust levels.
    pub accepted_trust_levels: TrustLevels,
}

/// Error type for failures of the [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client isn't connected.
    #[error("The client is not connected")]
    Disconnected,

    /// There is no device the stanza could be encrypted for.
    #[error("No device with an accepted trust level to encrypt the stanza for")]
    NoRecipientDevices,

    /// Any other error of the client.
    #[error(transparent)]
    Backend(Box<dyn Error + Send + Sync>),
}

impl TransportError {
    /// Create a new [`Backend`][Self::Backend] error.
    pub fn backend<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

/// The part of an XMPP client the trust engine talks to.
#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
pub trait Transport: AsyncTraitDeps {
    /// The full JID of the own client.
    fn own_jid(&self) -> String;

    /// Are message carbons enabled, i.e. do the own other devices receive a
    /// copy of sent messages.
    fn carbons_enabled(&self) -> bool;

    /// Encrypt and send a message.
    ///
    /// The message must only be encrypted for devices whose keys have one of
    /// the trust levels in [`SendStanzaParams::accepted_trust_levels`].
    async fn send_sensitive(
        &self,
        message: Message,
        params: SendStanzaParams,
    ) -> Result<(), TransportError>;
}
