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

//! XML (de)serialization of trust message elements.
//!
//! ```xml
//! <trust-message xmlns="urn:xmpp:tm:1" usage="urn:xmpp:atm:1" encryption="urn:xmpp:omemo:2">
//!   <key-owner jid="alice@example.org">
//!     <trust>base64 key ID</trust>
//!     <distrust>base64 key ID</distrust>
//!   </key-owner>
//! </trust-message>
//! ```

use std::io;

use quick_xml::{
    events::{attributes::AttrError, BytesEnd, BytesStart, BytesText, Event},
    name::{Namespace, ResolveResult},
    NsReader, Writer,
};
use thiserror::Error;

use super::{KeyOwner, TrustMessageElement, NS_TM};
use crate::types::KeyId;

/// Error type describing why a `<trust-message/>` element couldn't be parsed.
#[derive(Debug, Error)]
pub enum TrustMessageParseError {
    /// The input is not well-formed XML.
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    /// An attribute of an element is malformed.
    #[error(transparent)]
    Attribute(#[from] AttrError),

    /// The root element isn't a trust message element.
    #[error("expected a <trust-message xmlns='urn:xmpp:tm:1'/> element, got <{0}/>")]
    UnexpectedElement(String),

    /// The input ended before the trust message element was closed.
    #[error("the trust message element ended unexpectedly")]
    UnexpectedEof,

    /// A key ID isn't valid base64.
    #[error("a key ID of the trust message isn't valid base64: {0}")]
    InvalidKeyId(#[from] base64::DecodeError),
}

#[derive(Clone, Copy, Debug)]
enum KeyKind {
    Trust,
    Distrust,
}

fn attribute_value(
    start: &BytesStart<'_>,
    name: &[u8],
) -> Result<Option<String>, TrustMessageParseError> {
    for attribute in start.attributes() {
        let attribute = attribute?;

        if attribute.key.as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }

    Ok(None)
}

impl TrustMessageElement {
    /// Parse a `<trust-message/>` element.
    ///
    /// Unknown children are skipped, so are `<key-owner/>`, `<trust/>` and
    /// `<distrust/>` elements that aren't in the trust message namespace.
    pub fn from_xml(xml: &str) -> Result<Self, TrustMessageParseError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut element: Option<TrustMessageElement> = None;
        let mut key_owner: Option<KeyOwner> = None;
        let mut key_kind: Option<KeyKind> = None;
        let mut text = String::new();
        // Depth inside an unknown subtree. Skipped elements still go through
        // the resolver, so namespace declarations on them go out of scope
        // again with their end tag.
        let mut skip_depth = 0usize;

        loop {
            let (namespace, event) = reader.read_resolved_event()?;

            if skip_depth > 0 {
                match event {
                    Event::Start(_) => skip_depth += 1,
                    Event::End(_) => skip_depth -= 1,
                    Event::Eof => return Err(TrustMessageParseError::UnexpectedEof),
                    _ => {}
                }

                continue;
            }

            let is_tm_namespace =
                matches!(namespace, ResolveResult::Bound(Namespace(ns)) if ns == NS_TM.as_bytes());

            match event {
                Event::Start(ref start) | Event::Empty(ref start) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let local_name = start.local_name();

                    if element.is_none() {
                        if !is_tm_namespace || local_name.as_ref() != b"trust-message" {
                            return Err(TrustMessageParseError::UnexpectedElement(
                                String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                            ));
                        }

                        let parsed = TrustMessageElement {
                            usage: attribute_value(start, b"usage")?.unwrap_or_default(),
                            encryption: attribute_value(start, b"encryption")?
                                .unwrap_or_default(),
                            key_owners: Vec::new(),
                        };

                        if is_empty {
                            return Ok(parsed);
                        }

                        element = Some(parsed);
                    } else if key_owner.is_none() {
                        if is_tm_namespace && local_name.as_ref() == b"key-owner" {
                            let jid = attribute_value(start, b"jid")?.unwrap_or_default();
                            let owner = KeyOwner::new(&jid);

                            if is_empty {
                                if let Some(element) = element.as_mut() {
                                    element.add_key_owner(owner);
                                }
                            } else {
                                key_owner = Some(owner);
                            }
                        } else if !is_empty {
                            skip_depth = 1;
                        }
                    } else if key_kind.is_none() && is_tm_namespace && !is_empty {
                        key_kind = match local_name.as_ref() {
                            b"trust" => Some(KeyKind::Trust),
                            b"distrust" => Some(KeyKind::Distrust),
                            _ => None,
                        };

                        if key_kind.is_none() {
                            skip_depth = 1;
                        }

                        text.clear();
                    } else if !is_empty {
                        skip_depth = 1;
                    }
                }
                Event::Text(ref content) if key_kind.is_some() => {
                    text.push_str(&content.unescape()?);
                }
                Event::End(_) => {
                    if let Some(kind) = key_kind.take() {
                        let key_id = KeyId::from_base64(&text)?;

                        if let Some(owner) = key_owner.as_mut() {
                            match kind {
                                KeyKind::Trust => owner.trusted_keys.push(key_id),
                                KeyKind::Distrust => owner.distrusted_keys.push(key_id),
                            }
                        }
                    } else if let Some(owner) = key_owner.take() {
                        if let Some(element) = element.as_mut() {
                            element.add_key_owner(owner);
                        }
                    } else if let Some(element) = element.take() {
                        return Ok(element);
                    }
                }
                Event::Eof => return Err(TrustMessageParseError::UnexpectedEof),
                _ => {}
            }
        }
    }

    /// Serialize the element to XML.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        // Writing into a `Vec` doesn't fail.
        let _ = self.write_xml(&mut writer);

        String::from_utf8_lossy(&writer.into_inner()).into_owned()
    }

    /// Write the element into an XML writer.
    pub fn write_xml<W: io::Write>(&self, writer: &mut Writer<W>) -> Result<(), quick_xml::Error> {
        let mut start = BytesStart::new("trust-message");
        start.push_attribute(("xmlns", NS_TM));
        start.push_attribute(("usage", self.usage.as_str()));
        start.push_attribute(("encryption", self.encryption.as_str()));

        if self.key_owners.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;

        for key_owner in &self.key_owners {
            key_owner.write_xml(writer)?;
        }

        writer.write_event(Event::End(BytesEnd::new("trust-message")))?;

        Ok(())
    }
}

impl KeyOwner {
    fn write_xml<W: io::Write>(&self, writer: &mut Writer<W>) -> Result<(), quick_xml::Error> {
        let mut start = BytesStart::new("key-owner");
        start.push_attribute(("jid", self.jid.as_str()));

        if self.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;

        let keys = self
            .trusted_keys
            .iter()
            .map(|key_id| ("trust", key_id))
            .chain(self.distrusted_keys.iter().map(|key_id| ("distrust", key_id)));

        for (name, key_id) in keys {
            let encoded = key_id.to_base64();

            writer.write_event(Event::Start(BytesStart::new(name)))?;
            writer.write_event(Event::Text(BytesText::new(&encoded)))?;
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }

        writer.write_event(Event::End(BytesEnd::new("key-owner")))?;

        Ok(())
    }
}
