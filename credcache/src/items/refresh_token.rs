use serde::{Deserialize, Serialize};

use super::{non_empty, AdditionalFields, RefreshTokenType};
use crate::{ClientId, Secret};

/// A cached refresh token
///
/// Refresh tokens are not bound to scopes or tenants. A token with a family
/// id is a family refresh token, usable by every client in that family.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenItem {
    /// The stable identifier of the user
    #[serde(default)]
    pub home_account_id: String,
    /// The host of the issuing authority
    #[serde(default)]
    pub environment: String,
    /// The base64url client info blob echoed by the identity provider
    #[serde(rename = "client_info", default, skip_serializing_if = "String::is_empty")]
    pub raw_client_info: String,
    /// The client the token was issued to
    #[serde(default)]
    pub client_id: ClientId,
    /// The token itself
    #[serde(default)]
    pub secret: Secret,
    /// Always `RefreshToken`
    #[serde(default)]
    pub credential_type: RefreshTokenType,
    /// The family the token belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    /// The hash of the inbound assertion for on-behalf-of tokens
    #[serde(
        rename = "user_assertion_hash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub obo_cache_key: Option<String>,
    /// Properties not recognized by this version
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl RefreshTokenItem {
    /// The family id, treating an empty string as absent
    #[inline]
    pub fn family_id(&self) -> Option<&str> {
        non_empty(&self.family_id)
    }

    /// Whether this is a family refresh token
    #[inline]
    pub fn is_family_token(&self) -> bool {
        self.family_id().is_some()
    }

    /// The on-behalf-of assertion hash, if any
    #[inline]
    pub fn obo_cache_key(&self) -> Option<&str> {
        non_empty(&self.obo_cache_key)
    }

    /// The id a refresh token is keyed by: the family id when present, else the client id
    pub fn key_id(&self) -> &str {
        self.family_id().unwrap_or_else(|| self.client_id.as_str())
    }
}
