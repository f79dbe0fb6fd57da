use credcache_clock::{string_timestamp, DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use super::{non_empty, AccessTokenType, AdditionalFields};
use crate::{ClientId, ScopeSet, Secret};

/// The default token type, omitted from keys and the wire
pub const BEARER: &str = "Bearer";

/// A cached access token
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenItem {
    /// The stable identifier of the user, empty for application tokens
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
    /// Always `AccessToken`
    #[serde(default)]
    pub credential_type: AccessTokenType,
    /// The tenant
    #[serde(default)]
    pub realm: String,
    /// The space-delimited scopes granted to the token
    #[serde(default)]
    pub target: String,
    /// When the token was cached
    #[serde(default, with = "string_timestamp")]
    pub cached_at: UnixTime,
    /// When the token expires
    #[serde(default, with = "string_timestamp")]
    pub expires_on: UnixTime,
    /// When the token stops being usable even as a resilience fallback
    #[serde(default, with = "string_timestamp")]
    pub extended_expires_on: UnixTime,
    /// When the token should be proactively refreshed
    #[serde(
        default,
        with = "string_timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_on: Option<UnixTime>,
    /// The token type, such as `Bearer` or `pop`
    #[serde(default = "default_token_type", skip_serializing_if = "is_bearer")]
    pub token_type: String,
    /// The identifier of the proof-of-possession key bound to the token
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// The hash of the inbound assertion for on-behalf-of tokens
    #[serde(
        rename = "user_assertion_hash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub obo_cache_key: Option<String>,
    /// Set on tokens returned past their normal expiry
    #[serde(skip)]
    pub is_extended_lifetime_token: bool,
    /// Properties not recognized by this version
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

fn default_token_type() -> String {
    BEARER.to_owned()
}

fn is_bearer(token_type: &str) -> bool {
    token_type.is_empty() || token_type.eq_ignore_ascii_case(BEARER)
}

impl AccessTokenItem {
    /// The scopes granted to the token
    pub fn scopes(&self) -> ScopeSet {
        ScopeSet::parse(&self.target)
    }

    /// Whether this is a plain bearer token
    #[inline]
    pub fn is_bearer(&self) -> bool {
        is_bearer(&self.token_type)
    }

    /// Whether the token was obtained without a user
    #[inline]
    pub fn is_client_credential(&self) -> bool {
        self.home_account_id.is_empty()
    }

    /// The on-behalf-of assertion hash, if any
    #[inline]
    pub fn obo_cache_key(&self) -> Option<&str> {
        non_empty(&self.obo_cache_key)
    }

    /// Whether the token should be treated as expired at `now`
    ///
    /// Tokens within `buffer` of their expiry are considered expired.
    #[inline]
    pub fn is_expired(&self, now: UnixTime, buffer: DurationSecs) -> bool {
        now >= self.expires_on - buffer
    }

    /// Whether the token is still inside its extended lifetime at `now`
    #[inline]
    pub fn is_within_extended_lifetime(&self, now: UnixTime) -> bool {
        now < self.extended_expires_on
    }

    /// Whether the proactive refresh hint has passed
    #[inline]
    pub fn needs_refresh(&self, now: UnixTime) -> bool {
        self.refresh_on.map_or(false, |at| now >= at)
    }

    /// Fills in values that older writers leave out
    ///
    /// A missing extended expiry falls back to the legacy `ext_expires_on`
    /// property, and then to the normal expiry.
    pub(crate) fn normalize(&mut self) {
        if self.token_type.is_empty() {
            self.token_type = default_token_type();
        }

        if self.extended_expires_on == UnixTime(0) {
            self.extended_expires_on = self
                .additional_fields
                .get("ext_expires_on")
                .and_then(|v| match v {
                    serde_json::Value::String(s) => s.trim().parse().ok(),
                    serde_json::Value::Number(n) => n.as_u64(),
                    _ => None,
                })
                .map(UnixTime)
                .unwrap_or(self.expires_on);
        }
    }
}
