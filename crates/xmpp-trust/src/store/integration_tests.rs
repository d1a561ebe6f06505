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

/// Generate a suite of tests for an [`AtmTrustStorage`] implementation.
///
/// The invoking module needs to provide an `async fn get_store()` returning
/// an empty store.
///
/// The generated tests are `#[tokio::test]` functions, the `testing` feature
/// enables the `macros` and `rt` features of `tokio` they need.
///
/// [`AtmTrustStorage`]: crate::store::AtmTrustStorage
#[allow(unused_macros)]
#[macro_export]
macro_rules! trust_store_integration_tests {
    () => {
        mod trust_store_integration_tests {
            use std::collections::{BTreeMap, BTreeSet};

            use $crate::{
                store::{AtmTrustStorage, PostponedTrustDecisions, TrustStorage},
                KeyId, KeyOwner, KeysByOwner, SecurityPolicy, TrustLevel, TrustLevels,
            };

            use super::get_store;

            const OMEMO: &str = "urn:xmpp:omemo:2";
            const OX: &str = "urn:xmpp:openpgp:0";

            const ALICE: &str = "alice@example.org";
            const BOB: &str = "bob@example.com";
            const CAROL: &str = "carol@example.net";

            fn key(id: &str) -> KeyId {
                KeyId::from(id.as_bytes())
            }

            fn keys_by_owner(entries: &[(&str, &[&str])]) -> KeysByOwner {
                entries
                    .iter()
                    .map(|(owner, ids)| {
                        ((*owner).to_owned(), ids.iter().map(|id| key(id)).collect::<BTreeSet<_>>())
                    })
                    .collect()
            }

            #[tokio::test]
            async fn security_policy() {
                let store = get_store().await;

                assert_eq!(
                    store.security_policy(OMEMO).await.unwrap(),
                    SecurityPolicy::NoSecurityPolicy
                );

                store.set_security_policy(OMEMO, SecurityPolicy::Toakafa).await.unwrap();
                assert_eq!(store.security_policy(OMEMO).await.unwrap(), SecurityPolicy::Toakafa);
                assert_eq!(
                    store.security_policy(OX).await.unwrap(),
                    SecurityPolicy::NoSecurityPolicy
                );

                store.reset_security_policy(OMEMO).await.unwrap();
                assert_eq!(
                    store.security_policy(OMEMO).await.unwrap(),
                    SecurityPolicy::NoSecurityPolicy
                );
            }

            #[tokio::test]
            async fn own_key() {
                let store = get_store().await;
                assert_eq!(store.own_key(OMEMO).await.unwrap(), None);

                store.set_own_key(OMEMO, key("own")).await.unwrap();
                store.set_own_key(OX, key("own-ox")).await.unwrap();
                assert_eq!(store.own_key(OMEMO).await.unwrap(), Some(key("own")));

                store.reset_own_key(OMEMO).await.unwrap();
                assert_eq!(store.own_key(OMEMO).await.unwrap(), None);
                assert_eq!(store.own_key(OX).await.unwrap(), Some(key("own-ox")));
            }

            #[tokio::test]
            async fn add_and_query_keys() {
                let store = get_store().await;

                store
                    .add_keys(OMEMO, ALICE, &[key("a1"), key("a2")], TrustLevel::Authenticated)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, BOB, &[key("b1")], TrustLevel::default_for_new_keys())
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, BOB, &[key("b2")], TrustLevel::ManuallyDistrusted)
                    .await
                    .unwrap();
                store.add_keys(OX, CAROL, &[key("c1")], TrustLevel::Authenticated).await.unwrap();

                let keys = store.keys(OMEMO, TrustLevels::any()).await.unwrap();
                assert_eq!(
                    keys,
                    BTreeMap::from([
                        (TrustLevel::Authenticated, keys_by_owner(&[(ALICE, &["a1", "a2"])])),
                        (TrustLevel::AutomaticallyDistrusted, keys_by_owner(&[(BOB, &["b1"])])),
                        (TrustLevel::ManuallyDistrusted, keys_by_owner(&[(BOB, &["b2"])])),
                    ])
                );

                let keys = store
                    .keys(OMEMO, TrustLevels::AUTHENTICATED | TrustLevels::MANUALLY_DISTRUSTED)
                    .await
                    .unwrap();
                assert_eq!(keys.len(), 2);
                assert!(!keys.contains_key(&TrustLevel::AutomaticallyDistrusted));

                let keys = store.keys(OMEMO, TrustLevels::MANUALLY_TRUSTED).await.unwrap();
                assert!(keys.is_empty());

                // Adding a key again overwrites its trust level.
                store
                    .add_keys(OMEMO, BOB, &[key("b1")], TrustLevel::ManuallyTrusted)
                    .await
                    .unwrap();
                assert_eq!(
                    store.trust_level(OMEMO, BOB, &key("b1")).await.unwrap(),
                    TrustLevel::ManuallyTrusted
                );
            }

            #[tokio::test]
            async fn undecided_keys_are_not_stored() {
                let store = get_store().await;

                store.add_keys(OMEMO, ALICE, &[key("a1")], TrustLevel::Undecided).await.unwrap();
                assert!(store.keys(OMEMO, TrustLevels::any()).await.unwrap().is_empty());
                assert!(!store.has_key(OMEMO, ALICE, TrustLevels::UNDECIDED).await.unwrap());

                store
                    .add_keys(OMEMO, ALICE, &[key("a1")], TrustLevel::Authenticated)
                    .await
                    .unwrap();
                store.add_keys(OMEMO, ALICE, &[key("a1")], TrustLevel::Undecided).await.unwrap();

                assert_eq!(
                    store.trust_level(OMEMO, ALICE, &key("a1")).await.unwrap(),
                    TrustLevel::Undecided
                );
                assert!(store
                    .keys_of_owners(OMEMO, &[], TrustLevels::any())
                    .await
                    .unwrap()
                    .is_empty());
            }

            #[tokio::test]
            async fn remove_keys() {
                let store = get_store().await;

                store
                    .add_keys(OMEMO, ALICE, &[key("a1"), key("a2")], TrustLevel::Authenticated)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, BOB, &[key("b1"), key("b2")], TrustLevel::AutomaticallyTrusted)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, CAROL, &[key("c1")], TrustLevel::AutomaticallyTrusted)
                    .await
                    .unwrap();
                store.add_keys(OX, ALICE, &[key("a1")], TrustLevel::Authenticated).await.unwrap();

                store.remove_keys(OMEMO, &[key("a1"), key("b1")]).await.unwrap();
                assert_eq!(
                    store.keys(OMEMO, TrustLevels::any()).await.unwrap(),
                    BTreeMap::from([
                        (TrustLevel::Authenticated, keys_by_owner(&[(ALICE, &["a2"])])),
                        (
                            TrustLevel::AutomaticallyTrusted,
                            keys_by_owner(&[(BOB, &["b2"]), (CAROL, &["c1"])])
                        ),
                    ])
                );

                store.remove_keys_of_owner(OMEMO, BOB).await.unwrap();
                assert!(!store.has_key(OMEMO, BOB, TrustLevels::any()).await.unwrap());
                assert!(store.has_key(OMEMO, CAROL, TrustLevels::any()).await.unwrap());

                store.remove_all_keys(OMEMO).await.unwrap();
                assert!(store.keys(OMEMO, TrustLevels::any()).await.unwrap().is_empty());
                assert!(store.has_key(OX, ALICE, TrustLevels::AUTHENTICATED).await.unwrap());
            }

            #[tokio::test]
            async fn keys_of_owners() {
                let store = get_store().await;

                store
                    .add_keys(OMEMO, ALICE, &[key("a1")], TrustLevel::Authenticated)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, ALICE, &[key("a2")], TrustLevel::AutomaticallyDistrusted)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, BOB, &[key("b1")], TrustLevel::ManuallyTrusted)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, CAROL, &[key("c1")], TrustLevel::ManuallyTrusted)
                    .await
                    .unwrap();

                let keys = store
                    .keys_of_owners(OMEMO, &[ALICE.to_owned(), BOB.to_owned()], TrustLevels::any())
                    .await
                    .unwrap();
                assert_eq!(
                    keys,
                    BTreeMap::from([
                        (
                            ALICE.to_owned(),
                            BTreeMap::from([
                                (key("a1"), TrustLevel::Authenticated),
                                (key("a2"), TrustLevel::AutomaticallyDistrusted),
                            ])
                        ),
                        (
                            BOB.to_owned(),
                            BTreeMap::from([(key("b1"), TrustLevel::ManuallyTrusted)])
                        ),
                    ])
                );

                let owners = [ALICE.to_owned(), BOB.to_owned()];
                let keys = store
                    .keys_of_owners(OMEMO, &owners, TrustLevels::AUTHENTICATED)
                    .await
                    .unwrap();
                assert_eq!(
                    keys,
                    BTreeMap::from([(
                        ALICE.to_owned(),
                        BTreeMap::from([(key("a1"), TrustLevel::Authenticated)])
                    )])
                );

                let keys =
                    store.keys_of_owners(OMEMO, &[], TrustLevels::MANUALLY_TRUSTED).await.unwrap();
                assert_eq!(keys.keys().cloned().collect::<Vec<_>>(), [BOB, CAROL]);
            }

            #[tokio::test]
            async fn has_key() {
                let store = get_store().await;

                store
                    .add_keys(OMEMO, ALICE, &[key("a1")], TrustLevel::AutomaticallyTrusted)
                    .await
                    .unwrap();

                assert!(store.has_key(OMEMO, ALICE, TrustLevels::any()).await.unwrap());
                assert!(store
                    .has_key(
                        OMEMO,
                        ALICE,
                        TrustLevels::AUTOMATICALLY_TRUSTED | TrustLevels::AUTHENTICATED
                    )
                    .await
                    .unwrap());
                assert!(!store.has_key(OMEMO, ALICE, TrustLevels::AUTHENTICATED).await.unwrap());
                assert!(!store.has_key(OMEMO, BOB, TrustLevels::any()).await.unwrap());
                assert!(!store.has_key(OX, ALICE, TrustLevels::any()).await.unwrap());
            }

            #[tokio::test]
            async fn set_trust_level() {
                let store = get_store().await;

                store
                    .add_keys(OMEMO, ALICE, &[key("a1")], TrustLevel::Authenticated)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, ALICE, &[key("a2")], TrustLevel::AutomaticallyTrusted)
                    .await
                    .unwrap();

                let changed = store
                    .set_trust_level(
                        OMEMO,
                        &keys_by_owner(&[(ALICE, &["a1", "a2"]), (BOB, &["b1"])]),
                        TrustLevel::Authenticated,
                    )
                    .await
                    .unwrap();

                // The already authenticated key is left out, the unknown one is created.
                assert_eq!(changed, keys_by_owner(&[(ALICE, &["a2"]), (BOB, &["b1"])]));
                assert_eq!(
                    store.trust_level(OMEMO, BOB, &key("b1")).await.unwrap(),
                    TrustLevel::Authenticated
                );

                let changed = store
                    .set_trust_level(
                        OMEMO,
                        &keys_by_owner(&[(ALICE, &["a1", "a2"])]),
                        TrustLevel::Authenticated,
                    )
                    .await
                    .unwrap();
                assert!(changed.is_empty());

                let changed = store
                    .set_trust_level(
                        OMEMO,
                        &keys_by_owner(&[(BOB, &["b1"])]),
                        TrustLevel::Undecided,
                    )
                    .await
                    .unwrap();
                assert_eq!(changed, keys_by_owner(&[(BOB, &["b1"])]));
                assert!(!store.has_key(OMEMO, BOB, TrustLevels::any()).await.unwrap());
            }

            #[tokio::test]
            async fn set_trust_level_of_owners() {
                let store = get_store().await;

                store
                    .add_keys(
                        OMEMO,
                        ALICE,
                        &[key("a1"), key("a2")],
                        TrustLevel::AutomaticallyTrusted,
                    )
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, ALICE, &[key("a3")], TrustLevel::Authenticated)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, BOB, &[key("b1")], TrustLevel::AutomaticallyTrusted)
                    .await
                    .unwrap();
                store
                    .add_keys(OMEMO, CAROL, &[key("c1")], TrustLevel::AutomaticallyTrusted)
                    .await
                    .unwrap();

                let changed = store
                    .set_trust_level_of_owners(
                        OMEMO,
                        &[ALICE.to_owned(), BOB.to_owned()],
                        TrustLevel::AutomaticallyTrusted,
                        TrustLevel::AutomaticallyDistrusted,
                    )
                    .await
                    .unwrap();

                assert_eq!(changed, keys_by_owner(&[(ALICE, &["a1", "a2"]), (BOB, &["b1"])]));
                assert_eq!(
                    store.trust_level(OMEMO, ALICE, &key("a3")).await.unwrap(),
                    TrustLevel::Authenticated
                );
                assert_eq!(
                    store.trust_level(OMEMO, CAROL, &key("c1")).await.unwrap(),
                    TrustLevel::AutomaticallyTrusted
                );

                let changed = store
                    .set_trust_level_of_owners(
                        OMEMO,
                        &[ALICE.to_owned()],
                        TrustLevel::AutomaticallyTrusted,
                        TrustLevel::AutomaticallyDistrusted,
                    )
                    .await
                    .unwrap();
                assert!(changed.is_empty());
            }

            #[tokio::test]
            async fn trust_level_is_per_owner_and_namespace() {
                let store = get_store().await;

                store
                    .add_keys(OMEMO, ALICE, &[key("shared")], TrustLevel::Authenticated)
                    .await
                    .unwrap();

                assert_eq!(
                    store.trust_level(OMEMO, ALICE, &key("shared")).await.unwrap(),
                    TrustLevel::Authenticated
                );
                assert_eq!(
                    store.trust_level(OMEMO, BOB, &key("shared")).await.unwrap(),
                    TrustLevel::Undecided
                );
                assert_eq!(
                    store.trust_level(OX, ALICE, &key("shared")).await.unwrap(),
                    TrustLevel::Undecided
                );
            }

            #[tokio::test]
            async fn reset_all() {
                let store = get_store().await;

                for encryption in [OMEMO, OX] {
                    store.set_security_policy(encryption, SecurityPolicy::Toakafa).await.unwrap();
                    store.set_own_key(encryption, key("own")).await.unwrap();
                    store
                        .add_keys(encryption, ALICE, &[key("a1")], TrustLevel::Authenticated)
                        .await
                        .unwrap();
                    store
                        .add_keys_for_postponed_trust_decisions(
                            encryption,
                            &key("a1"),
                            &[KeyOwner::with_keys(BOB, vec![key("b1")], vec![])],
                        )
                        .await
                        .unwrap();
                }

                store.reset_all(OMEMO).await.unwrap();

                assert_eq!(
                    store.security_policy(OMEMO).await.unwrap(),
                    SecurityPolicy::NoSecurityPolicy
                );
                assert_eq!(store.own_key(OMEMO).await.unwrap(), None);
                assert!(store.keys(OMEMO, TrustLevels::any()).await.unwrap().is_empty());
                assert!(store
                    .keys_for_postponed_trust_decisions(OMEMO, &[])
                    .await
                    .unwrap()
                    .is_empty());

                assert_eq!(store.security_policy(OX).await.unwrap(), SecurityPolicy::Toakafa);
                assert_eq!(store.own_key(OX).await.unwrap(), Some(key("own")));
                assert!(store.has_key(OX, ALICE, TrustLevels::any()).await.unwrap());
                assert!(!store
                    .keys_for_postponed_trust_decisions(OX, &[])
                    .await
                    .unwrap()
                    .is_empty());
            }

            #[tokio::test]
            async fn postponed_trust_decisions() {
                let store = get_store().await;

                let alice = KeyOwner::with_keys(
                    ALICE,
                    vec![key("a1"), key("a2")],
                    vec![key("a3")],
                );
                let bob = KeyOwner::with_keys(BOB, vec![key("b1")], vec![key("b2")]);

                store
                    .add_keys_for_postponed_trust_decisions(OMEMO, &key("sender-1"), &[alice])
                    .await
                    .unwrap();
                store
                    .add_keys_for_postponed_trust_decisions(OMEMO, &key("sender-2"), &[bob])
                    .await
                    .unwrap();

                let decisions = store
                    .keys_for_postponed_trust_decisions(OMEMO, &[key("sender-1")])
                    .await
                    .unwrap();
                assert_eq!(
                    decisions,
                    PostponedTrustDecisions {
                        trusted: keys_by_owner(&[(ALICE, &["a1", "a2"])]),
                        distrusted: keys_by_owner(&[(ALICE, &["a3"])]),
                    }
                );

                // An empty list of senders returns everything.
                let decisions = store.keys_for_postponed_trust_decisions(OMEMO, &[]).await.unwrap();
                assert_eq!(
                    decisions.trusted,
                    keys_by_owner(&[(ALICE, &["a1", "a2"]), (BOB, &["b1"])])
                );
                assert_eq!(
                    decisions.distrusted,
                    keys_by_owner(&[(ALICE, &["a3"]), (BOB, &["b2"])])
                );

                assert!(store
                    .keys_for_postponed_trust_decisions(OX, &[])
                    .await
                    .unwrap()
                    .is_empty());
            }

            #[tokio::test]
            async fn postponed_trust_decisions_are_overwritten() {
                let store = get_store().await;

                store
                    .add_keys_for_postponed_trust_decisions(
                        OMEMO,
                        &key("sender"),
                        &[KeyOwner::with_keys(ALICE, vec![key("a1")], vec![])],
                    )
                    .await
                    .unwrap();
                store
                    .add_keys_for_postponed_trust_decisions(
                        OMEMO,
                        &key("sender"),
                        &[KeyOwner::with_keys(ALICE, vec![], vec![key("a1")])],
                    )
                    .await
                    .unwrap();

                let decisions = store
                    .keys_for_postponed_trust_decisions(OMEMO, &[key("sender")])
                    .await
                    .unwrap();
                assert!(decisions.trusted.is_empty());
                assert_eq!(decisions.distrusted, keys_by_owner(&[(ALICE, &["a1"])]));

                // A key that is trusted and distrusted at the same time ends up distrusted.
                store
                    .add_keys_for_postponed_trust_decisions(
                        OMEMO,
                        &key("sender"),
                        &[KeyOwner::with_keys(BOB, vec![key("b1")], vec![key("b1")])],
                    )
                    .await
                    .unwrap();

                let decisions = store
                    .keys_for_postponed_trust_decisions(OMEMO, &[key("sender")])
                    .await
                    .unwrap();
                assert!(decisions.trusted.is_empty());
                assert_eq!(
                    decisions.distrusted,
                    keys_by_owner(&[(ALICE, &["a1"]), (BOB, &["b1"])])
                );
            }

            #[tokio::test]
            async fn remove_postponed_trust_decisions() {
                let store = get_store().await;

                store
                    .add_keys_for_postponed_trust_decisions(
                        OMEMO,
                        &key("sender-1"),
                        &[
                            KeyOwner::with_keys(ALICE, vec![key("a1")], vec![key("a2")]),
                            KeyOwner::with_keys(BOB, vec![key("b1")], vec![]),
                        ],
                    )
                    .await
                    .unwrap();
                store
                    .add_keys_for_postponed_trust_decisions(
                        OMEMO,
                        &key("sender-2"),
                        &[KeyOwner::with_keys(CAROL, vec![key("a2")], vec![key("c1")])],
                    )
                    .await
                    .unwrap();

                // Only decisions whose trust flag matches the list are removed.
                store
                    .remove_keys_for_postponed_trust_decisions(
                        OMEMO,
                        &[key("a1"), key("c1")],
                        &[key("a2")],
                    )
                    .await
                    .unwrap();

                let decisions = store.keys_for_postponed_trust_decisions(OMEMO, &[]).await.unwrap();
                assert_eq!(
                    decisions,
                    PostponedTrustDecisions {
                        trusted: keys_by_owner(&[(BOB, &["b1"]), (CAROL, &["a2"])]),
                        distrusted: keys_by_owner(&[(CAROL, &["c1"])]),
                    }
                );

                store
                    .remove_keys_for_postponed_trust_decisions_by_sender(OMEMO, &[key("sender-2")])
                    .await
                    .unwrap();

                let decisions = store.keys_for_postponed_trust_decisions(OMEMO, &[]).await.unwrap();
                assert_eq!(
                    decisions,
                    PostponedTrustDecisions {
                        trusted: keys_by_owner(&[(BOB, &["b1"])]),
                        distrusted: KeysByOwner::new(),
                    }
                );

                store.remove_all_keys_for_postponed_trust_decisions(OMEMO).await.unwrap();
                assert!(store
                    .keys_for_postponed_trust_decisions(OMEMO, &[])
                    .await
                    .unwrap()
                    .is_empty());
            }
        }
    };
}
