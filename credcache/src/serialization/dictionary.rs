//! The flat dictionary format of the previous library generation
//!
//! The buffer is a list of `{"Key": collection, "Value": [item, ...]}` pairs,
//! where each item is itself a JSON document encoded as a string. App metadata
//! is not part of this format.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    accessor::CacheSnapshot,
    items::{AccessTokenItem, AccountItem, IdTokenItem, RefreshTokenItem},
    CacheError, Codec,
};

const ACCESS_TOKENS: &str = "access_tokens";
const REFRESH_TOKENS: &str = "refresh_tokens";
const ID_TOKENS: &str = "id_tokens";
const ACCOUNTS: &str = "accounts";

#[derive(Debug, Serialize, Deserialize)]
struct Pair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Wire {
    Pairs(Vec<Pair>),
    Object(BTreeMap<String, Vec<String>>),
}

impl Wire {
    fn into_pairs(self) -> Vec<(String, Vec<String>)> {
        match self {
            Self::Pairs(pairs) => pairs.into_iter().map(|p| (p.key, p.value)).collect(),
            Self::Object(map) => map.into_iter().collect(),
        }
    }
}

fn encode<T: Serialize>(items: &[T]) -> Result<Vec<String>, CacheError> {
    items
        .iter()
        .map(|item| serde_json::to_string(item).map_err(CacheError::from))
        .collect()
}

pub(super) fn serialize(snapshot: &CacheSnapshot) -> Result<Vec<u8>, CacheError> {
    let pairs = vec![
        Pair {
            key: ACCESS_TOKENS.to_owned(),
            value: encode(&snapshot.access_tokens)?,
        },
        Pair {
            key: REFRESH_TOKENS.to_owned(),
            value: encode(&snapshot.refresh_tokens)?,
        },
        Pair {
            key: ID_TOKENS.to_owned(),
            value: encode(&snapshot.id_tokens)?,
        },
        Pair {
            key: ACCOUNTS.to_owned(),
            value: encode(&snapshot.accounts)?,
        },
    ];

    tracing::trace!(items = snapshot.len(), "serializing dictionary cache");
    Ok(serde_json::to_vec(&pairs)?)
}

fn decode<T: DeserializeOwned>(
    values: &[String],
    malformed: impl Fn(serde_json::Error) -> CacheError,
) -> Result<Vec<T>, CacheError> {
    values
        .iter()
        .map(|v| serde_json::from_str(v).map_err(&malformed))
        .collect()
}

/// Parses a dictionary buffer, returning `None` for blank input
pub(super) fn deserialize(data: &[u8]) -> Result<Option<CacheSnapshot>, CacheError> {
    if super::is_blank(data) {
        return Ok(None);
    }

    let malformed = |err| CacheError::malformed(Codec::Dictionary, data, err);
    let wire: Wire = serde_json::from_slice(data).map_err(malformed)?;

    let mut snapshot = CacheSnapshot::default();
    for (key, values) in wire.into_pairs() {
        match key.as_str() {
            ACCESS_TOKENS => {
                let mut items = decode::<AccessTokenItem>(&values, malformed)?;
                items.iter_mut().for_each(|at| at.normalize());
                snapshot.access_tokens.extend(items);
            }
            REFRESH_TOKENS => {
                let items = decode::<RefreshTokenItem>(&values, malformed)?;
                snapshot.refresh_tokens.extend(items)
            }
            ID_TOKENS => {
                let items = decode::<IdTokenItem>(&values, malformed)?;
                snapshot.id_tokens.extend(items)
            }
            ACCOUNTS => {
                let items = decode::<AccountItem>(&values, malformed)?;
                snapshot.accounts.extend(items)
            }
            other => {
                tracing::debug!(collection = other, "ignoring unknown dictionary collection")
            }
        }
    }

    tracing::trace!(items = snapshot.len(), "read dictionary cache");
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        accessor::{CacheStore, UserTokenStore},
        TokenCacheSerializer,
    };

    fn access_token() -> String {
        json!({
            "home_account_id": "uid.utid",
            "environment": "login.microsoftonline.com",
            "client_id": "client",
            "secret": "at",
            "credential_type": "AccessToken",
            "realm": "tenant",
            "target": "user.read",
            "cached_at": "1",
            "expires_on": "2",
            "extended_expires_on": "3",
            "future": "kept"
        })
        .to_string()
    }

    fn refresh_token(home_account_id: &str) -> String {
        json!({
            "home_account_id": home_account_id,
            "environment": "login.microsoftonline.com",
            "client_id": "client",
            "secret": "rt",
            "credential_type": "RefreshToken"
        })
        .to_string()
    }

    #[test]
    fn reads_the_key_value_list() -> color_eyre::Result<()> {
        let payload = json!([
            { "Key": "access_tokens", "Value": [access_token()] },
            { "Key": "refresh_tokens", "Value": [refresh_token("a"), refresh_token("b")] },
            { "Key": "id_tokens", "Value": [] },
            { "Key": "accounts", "Value": [] },
        ]);

        let store = CacheStore::from(UserTokenStore::new());
        store.deserialize_dictionary(&serde_json::to_vec(&payload)?, true)?;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.access_tokens.len(), 1);
        assert_eq!(snapshot.refresh_tokens.len(), 2);
        assert_eq!(snapshot.access_tokens[0].additional_fields["future"], "kept");
        Ok(())
    }

    #[test]
    fn reads_the_object_form() -> color_eyre::Result<()> {
        let payload = json!({ "refresh_tokens": [refresh_token("a")] });

        let store = CacheStore::from(UserTokenStore::new());
        store.deserialize_dictionary(&serde_json::to_vec(&payload)?, false)?;
        assert_eq!(store.snapshot().refresh_tokens.len(), 1);
        Ok(())
    }

    #[test]
    fn reserializing_is_a_fixed_point() -> color_eyre::Result<()> {
        let payload = json!([
            { "Key": "access_tokens", "Value": [access_token()] },
            { "Key": "refresh_tokens", "Value": [refresh_token("a")] },
        ]);

        let store = CacheStore::from(UserTokenStore::new());
        store.deserialize_dictionary(&serde_json::to_vec(&payload)?, true)?;
        let first = store.serialize_dictionary()?;

        let other = CacheStore::from(UserTokenStore::new());
        other.deserialize_dictionary(&first, true)?;
        assert_eq!(first, other.serialize_dictionary()?);

        let written: Value = serde_json::from_slice(&first)?;
        assert_eq!(written[0]["Key"], "access_tokens");
        assert_eq!(written[3]["Key"], "accounts");
        Ok(())
    }

    #[test]
    fn malformed_items_are_rejected() {
        let payload = json!([{ "Key": "access_tokens", "Value": ["{not json"] }]);
        let store = CacheStore::from(UserTokenStore::new());

        let err = store
            .deserialize_dictionary(&serde_json::to_vec(&payload).unwrap(), true)
            .unwrap_err();
        assert!(err.is_malformed_input());
    }
}
