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

//! `xmpp:` URIs carrying a trust message, usually scanned from a QR code.
//!
//! ```text
//! xmpp:alice@example.org?trust-message;encryption=urn:xmpp:omemo:2;trust=6850019d;distrust=...
//! ```

use std::{fmt, str::FromStr};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;
use url::Url;

use crate::types::KeyId;

const SCHEME: &str = "xmpp";
const QUERY_TYPE: &str = "trust-message";

const JID_ENCODE_SET: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'<').add(b'>').add(b'?').add(b'`');
const VALUE_ENCODE_SET: &AsciiSet = &JID_ENCODE_SET.add(b'&').add(b';').add(b'=');

/// Error type for the parsing of a [`TrustMessageUri`].
#[derive(Debug, Error)]
pub enum UriError {
    /// The string isn't a valid URI at all.
    #[error("the trust message URI could not be parsed: {0}")]
    UrlParse(#[from] url::ParseError),
    /// The URI doesn't use the `xmpp` scheme.
    #[error("the trust message URI has an unexpected scheme, expected xmpp, got {0}")]
    WrongScheme(String),
    /// The URI has no query.
    #[error("the trust message URI is missing its query")]
    MissingQuery,
    /// The query of the URI isn't a trust message query.
    #[error("the URI query is not a trust message query, got {0:?}")]
    WrongQueryType(String),
    /// The query doesn't name the encryption protocol of the keys.
    #[error("the trust message URI is missing the encryption parameter")]
    MissingEncryption,
    /// A component of the URI isn't valid percent-encoded UTF-8.
    #[error("the trust message URI contains invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// A key ID isn't valid hex.
    #[error("a key ID of the trust message URI isn't valid hex: {0}")]
    InvalidKeyId(#[from] hex::FromHexError),
}

/// A trust message encoded as an `xmpp:` URI.
///
/// Key IDs are transported as lowercase hex.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustMessageUri {
    /// The JID of the key owner.
    pub jid: String,
    /// The namespace of the encryption protocol the keys belong to.
    pub encryption: String,
    /// The IDs of the keys to authenticate.
    pub trust_key_ids: Vec<KeyId>,
    /// The IDs of the keys to distrust.
    pub distrust_key_ids: Vec<KeyId>,
}

fn decode(component: &str) -> Result<String, UriError> {
    Ok(percent_decode_str(component).decode_utf8()?.into_owned())
}

impl TrustMessageUri {
    /// Parse a trust message URI.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let url = Url::parse(uri.trim())?;

        if url.scheme() != SCHEME {
            return Err(UriError::WrongScheme(url.scheme().to_owned()));
        }

        let query = url.query().ok_or(UriError::MissingQuery)?;
        let mut items = query.split(';');

        let query_type = items.next().unwrap_or_default();
        if query_type != QUERY_TYPE {
            return Err(UriError::WrongQueryType(decode(query_type)?));
        }

        let mut parsed = TrustMessageUri { jid: decode(url.path())?, ..Default::default() };
        let mut encryption = None;

        for item in items {
            let (key, value) = item.split_once('=').unwrap_or((item, ""));
            let value = decode(value)?;

            match key {
                "encryption" => encryption = Some(value),
                "trust" => parsed.trust_key_ids.push(KeyId::from_hex(&value)?),
                "distrust" => parsed.distrust_key_ids.push(KeyId::from_hex(&value)?),
                _ => {}
            }
        }

        parsed.encryption = encryption.ok_or(UriError::MissingEncryption)?;

        Ok(parsed)
    }
}

impl FromStr for TrustMessageUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TrustMessageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}:{}?{QUERY_TYPE};encryption={}",
            utf8_percent_encode(&self.jid, JID_ENCODE_SET),
            utf8_percent_encode(&self.encryption, VALUE_ENCODE_SET)
        )?;

        for key_id in &self.trust_key_ids {
            write!(f, ";trust={}", key_id.to_hex())?;
        }

        for key_id in &self.distrust_key_ids {
            write!(f, ";distrust={}", key_id.to_hex())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::{assert_let, assert_matches};
    use similar_asserts::assert_eq;

    use super::{TrustMessageUri, UriError};
    use crate::{trust_message::NS_OMEMO_2, types::KeyId};

    const URI: &str = "xmpp:alice@example.org?trust-message;encryption=urn:xmpp:omemo:2;\
                       trust=6850019d;trust=221a4f8e;distrust=b2c1";

    #[test]
    fn test_parse_uri() {
        let uri: TrustMessageUri = URI.parse().unwrap();

        assert_eq!(uri.jid, "alice@example.org");
        assert_eq!(uri.encryption, NS_OMEMO_2);
        assert_eq!(
            uri.trust_key_ids,
            vec![KeyId::from(b"\x68\x50\x01\x9d"), KeyId::from(b"\x22\x1a\x4f\x8e")]
        );
        assert_eq!(uri.distrust_key_ids, vec![KeyId::from(b"\xb2\xc1")]);
        assert_eq!(uri.to_string(), URI);
    }

    #[test]
    fn test_percent_encoded_values() {
        let uri = TrustMessageUri::parse(
            "xmpp:alice@example.org?trust-message;encryption=urn%3Aexample%3Bweird%3Dns",
        )
        .unwrap();

        assert_eq!(uri.encryption, "urn:example;weird=ns");
        assert!(uri.trust_key_ids.is_empty());
        assert_eq!(
            uri.to_string(),
            "xmpp:alice@example.org?trust-message;encryption=urn:example%3Bweird%3Dns"
        );
    }

    #[test]
    fn test_invalid_uris() {
        assert_matches!(TrustMessageUri::parse("not a uri"), Err(UriError::UrlParse(_)));

        assert_let!(
            Err(UriError::WrongScheme(scheme)) =
                TrustMessageUri::parse("https://example.org?trust-message;encryption=e")
        );
        assert_eq!(scheme, "https");

        assert_matches!(
            TrustMessageUri::parse("xmpp:alice@example.org"),
            Err(UriError::MissingQuery)
        );

        assert_let!(
            Err(UriError::WrongQueryType(query_type)) =
                TrustMessageUri::parse("xmpp:alice@example.org?message;body=hi")
        );
        assert_eq!(query_type, "message");

        assert_matches!(
            TrustMessageUri::parse("xmpp:alice@example.org?trust-message;trust=6850019d"),
            Err(UriError::MissingEncryption)
        );
        assert_matches!(
            TrustMessageUri::parse("xmpp:alice@example.org?trust-message;encryption=e;trust=xyz"),
            Err(UriError::InvalidKeyId(_))
        );
    }
}
