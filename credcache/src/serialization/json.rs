//! The v3 JSON format

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    accessor::CacheSnapshot,
    items::{
        AccessTokenItem, AccountItem, AdditionalFields, AppMetadataItem, IdTokenItem,
        RefreshTokenItem,
    },
    CacheError, Codec,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "AccessToken", default)]
    access_tokens: BTreeMap<String, AccessTokenItem>,
    #[serde(rename = "RefreshToken", default)]
    refresh_tokens: BTreeMap<String, RefreshTokenItem>,
    #[serde(rename = "IdToken", default)]
    id_tokens: BTreeMap<String, IdTokenItem>,
    #[serde(rename = "Account", default)]
    accounts: BTreeMap<String, AccountItem>,
    #[serde(rename = "AppMetadata", default)]
    app_metadata: BTreeMap<String, AppMetadataItem>,
    #[serde(flatten)]
    unknown_nodes: AdditionalFields,
}

pub(super) fn serialize(snapshot: &CacheSnapshot) -> Result<Vec<u8>, CacheError> {
    let document = Document {
        access_tokens: keyed(&snapshot.access_tokens, AccessTokenItem::cache_key),
        refresh_tokens: keyed(&snapshot.refresh_tokens, RefreshTokenItem::cache_key),
        id_tokens: keyed(&snapshot.id_tokens, IdTokenItem::cache_key),
        accounts: keyed(&snapshot.accounts, AccountItem::cache_key),
        app_metadata: keyed(&snapshot.app_metadata, AppMetadataItem::cache_key),
        unknown_nodes: snapshot.unknown_nodes.clone(),
    };

    tracing::trace!(items = snapshot.len(), "serializing v3 cache");
    Ok(serde_json::to_vec(&document)?)
}

fn keyed<T: Clone>(items: &[T], key: impl Fn(&T) -> String) -> BTreeMap<String, T> {
    items.iter().map(|item| (key(item), item.clone())).collect()
}

/// Parses a v3 buffer, returning `None` for blank input
///
/// Keys in the buffer are ignored; they are recomputed from each item.
pub(super) fn deserialize(data: &[u8]) -> Result<Option<CacheSnapshot>, CacheError> {
    if super::is_blank(data) {
        return Ok(None);
    }

    let document: Document =
        serde_json::from_slice(data).map_err(|err| CacheError::malformed(Codec::V3, data, err))?;

    let access_tokens = document
        .access_tokens
        .into_values()
        .map(|mut at| {
            at.normalize();
            at
        })
        .collect();

    let snapshot = CacheSnapshot {
        access_tokens,
        refresh_tokens: document.refresh_tokens.into_values().collect(),
        id_tokens: document.id_tokens.into_values().collect(),
        accounts: document.accounts.into_values().collect(),
        app_metadata: document.app_metadata.into_values().collect(),
        unknown_nodes: document.unknown_nodes,
    };

    tracing::trace!(items = snapshot.len(), "read v3 cache");
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        accessor::{AppTokenStore, CacheStore, TokenCacheAccessor, UserTokenStore},
        TokenCacheSerializer,
    };

    const HOME_ACCOUNT: &str = "uid.utid";

    fn document() -> Value {
        json!({
            "AccessToken": {
                "uid.utid-login.windows.net-accesstoken-client-tenant-user.read": {
                    "home_account_id": HOME_ACCOUNT,
                    "environment": "login.windows.net",
                    "client_info": "eyJ1aWQiOiJ1aWQiLCJ1dGlkIjoidXRpZCJ9",
                    "client_id": "client",
                    "secret": "at",
                    "credential_type": "AccessToken",
                    "realm": "tenant",
                    "target": "user.read",
                    "cached_at": "100",
                    "expires_on": "4000",
                    "extended_expires_on": "8000",
                    "at_extra": "kept"
                }
            },
            "RefreshToken": {
                "uid.utid-login.windows.net-refreshtoken-client--": {
                    "home_account_id": HOME_ACCOUNT,
                    "environment": "login.windows.net",
                    "client_id": "client",
                    "secret": "rt",
                    "credential_type": "RefreshToken",
                    "rt_extra": { "nested": true }
                }
            },
            "IdToken": {
                "uid.utid-login.windows.net-idtoken-client-tenant-": {
                    "home_account_id": HOME_ACCOUNT,
                    "environment": "login.windows.net",
                    "client_id": "client",
                    "secret": "header.payload.",
                    "credential_type": "IdToken",
                    "realm": "tenant",
                    "idt_extra": [1, 2]
                }
            },
            "Account": {
                "uid.utid-login.windows.net-tenant": {
                    "home_account_id": HOME_ACCOUNT,
                    "environment": "login.windows.net",
                    "username": "user@contoso.com",
                    "local_account_id": "uid",
                    "authority_type": "MSSTS",
                    "realm": "tenant",
                    "account_extra": 5
                }
            },
            "AppMetadata": {
                "appmetadata-login.windows.net-client": {
                    "client_id": "client",
                    "environment": "login.windows.net",
                    "family_id": "1",
                    "metadata_extra": null
                }
            },
            "FutureSection": { "anything": "goes" }
        })
    }

    fn load(store: &CacheStore, value: &Value) -> color_eyre::Result<()> {
        store.deserialize_v3(&serde_json::to_vec(value)?, true)?;
        Ok(())
    }

    #[test]
    fn read_modify_write_is_lossless() -> color_eyre::Result<()> {
        let store = CacheStore::from(UserTokenStore::new());
        load(&store, &document())?;

        let written: Value = serde_json::from_slice(&store.serialize_v3()?)?;
        assert_eq!(written, document());
        Ok(())
    }

    #[test]
    fn reserializing_is_a_fixed_point() -> color_eyre::Result<()> {
        let store = CacheStore::from(UserTokenStore::new());
        load(&store, &document())?;
        let first = store.serialize_v3()?;

        let other = CacheStore::from(UserTokenStore::new());
        other.deserialize_v3(&first, true)?;
        let second = other.serialize_v3()?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn keys_are_recomputed_on_read() -> color_eyre::Result<()> {
        let mut doc = document();
        let tokens = doc["AccessToken"].as_object_mut().unwrap();
        let token = tokens.remove("uid.utid-login.windows.net-accesstoken-client-tenant-user.read");
        tokens.insert("SomeStaleKey".into(), token.unwrap());

        let store = CacheStore::from(UserTokenStore::new());
        load(&store, &doc)?;

        let at = store
            .accessor()
            .get_access_token(
                HOME_ACCOUNT,
                "uid.utid-login.windows.net-accesstoken-client-tenant-user.read",
            )
            .unwrap();
        assert_eq!(at.additional_fields["at_extra"], "kept");
        Ok(())
    }

    #[test]
    fn merge_and_clear_counts() -> color_eyre::Result<()> {
        let store = CacheStore::from(UserTokenStore::new());
        load(&store, &document())?;
        assert_eq!(store.snapshot().len(), 5);

        let incoming = json!({
            "RefreshToken": {
                "ignored": {
                    "home_account_id": HOME_ACCOUNT,
                    "environment": "login.windows.net",
                    "client_id": "client",
                    "secret": "rt-updated",
                    "credential_type": "RefreshToken"
                },
                "ignored-too": {
                    "home_account_id": "other.user",
                    "environment": "login.windows.net",
                    "client_id": "client",
                    "secret": "rt-other",
                    "credential_type": "RefreshToken"
                }
            }
        });
        let incoming = serde_json::to_vec(&incoming)?;

        // one overlap, one new item
        store.deserialize_v3(&incoming, false)?;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 5 + 2 - 1);
        assert!(snapshot
            .refresh_tokens
            .iter()
            .any(|rt| rt.secret.as_str() == "rt-updated"));

        // app metadata is global and survives the clear
        store.deserialize_v3(&incoming, true)?;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.refresh_tokens.len(), 2);
        assert!(snapshot.access_tokens.is_empty());
        assert_eq!(snapshot.app_metadata.len(), 1);
        Ok(())
    }

    #[test]
    fn timestamps_are_written_as_strings() -> color_eyre::Result<()> {
        let mut doc = document();
        doc["AccessToken"]["uid.utid-login.windows.net-accesstoken-client-tenant-user.read"]
            ["expires_on"] = json!(4000);

        let store = CacheStore::from(UserTokenStore::new());
        load(&store, &doc)?;

        let written: Value = serde_json::from_slice(&store.serialize_v3()?)?;
        assert_eq!(
            written["AccessToken"]["uid.utid-login.windows.net-accesstoken-client-tenant-user.read"]
                ["expires_on"],
            "4000"
        );
        Ok(())
    }

    #[test]
    fn application_cache_accepts_access_tokens_only() -> color_eyre::Result<()> {
        let store = CacheStore::from(AppTokenStore::new());

        let app_only = json!({
            "AccessToken": {
                "k": {
                    "environment": "login.windows.net",
                    "client_id": "client",
                    "secret": "at",
                    "credential_type": "AccessToken",
                    "realm": "tenant",
                    "target": "api://x/.default",
                    "cached_at": "1",
                    "expires_on": "2",
                    "extended_expires_on": "3"
                }
            },
            "RefreshToken": {},
            "IdToken": {},
            "Account": {},
            "AppMetadata": {}
        });
        load(&store, &app_only)?;
        assert_eq!(store.snapshot().access_tokens.len(), 1);

        let err = load(&store, &document()).unwrap_err();
        assert!(err.to_string().contains("not supported"));
        Ok(())
    }

    #[test]
    fn empty_cache_writes_every_section() -> color_eyre::Result<()> {
        let store = CacheStore::from(UserTokenStore::new());
        let written: Value = serde_json::from_slice(&store.serialize_v3()?)?;
        assert_eq!(
            written,
            json!({
                "AccessToken": {},
                "RefreshToken": {},
                "IdToken": {},
                "Account": {},
                "AppMetadata": {}
            })
        );
        Ok(())
    }
}
