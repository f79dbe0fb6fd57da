//! Token endpoint responses and the request they answer

use credcache_clock::DurationSecs;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{items::AdditionalFields, legacy::host_of, ClientId, ScopeSet, Secret};

/// A successful response from a token endpoint
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The token type, usually `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,

    /// The scopes actually granted, space-delimited
    #[serde(default)]
    pub scope: Option<String>,

    /// Seconds until the access token expires
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<DurationSecs>,

    /// Seconds until the access token's extended lifetime ends
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub ext_expires_in: Option<DurationSecs>,

    /// Seconds until the access token should be proactively refreshed
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub refresh_in: Option<DurationSecs>,

    /// The access token
    pub access_token: Secret,

    /// The refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<Secret>,

    /// The ID token, if issued
    #[serde(default)]
    pub id_token: Option<Secret>,

    /// The base64url client info blob, if issued
    #[serde(default)]
    pub client_info: Option<String>,

    /// The family the client belongs to, if any
    #[serde(default, rename = "foci")]
    pub family_id: Option<String>,

    /// Everything else the endpoint returned
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl TokenResponse {
    /// The family id, treating an empty string as absent
    pub fn family_id(&self) -> Option<&str> {
        self.family_id.as_deref().filter(|f| !f.is_empty())
    }
}

/// Accepts a number of seconds written either as a JSON number or a string
fn lenient_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DurationSecs>, D::Error> {
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    let text = match Option::<Seconds>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Seconds::Number(secs)) => return Ok(Some(DurationSecs(secs))),
        Some(Seconds::Text(text)) => text,
    };

    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    text.parse()
        .map(|secs| Some(DurationSecs(secs)))
        .map_err(|_| D::Error::custom(format_args!("invalid number of seconds: {text:?}")))
}

/// The request a token response answers
#[derive(Clone, Debug)]
pub struct TokenRequestContext {
    client_id: ClientId,
    authority: String,
    environment: String,
    realm: String,
    scopes: ScopeSet,
    obo_cache_key: Option<String>,
    token_type: Option<String>,
    key_id: Option<String>,
}

impl TokenRequestContext {
    /// A request made by `client_id` to `authority` (for example
    /// `https://login.microsoftonline.com/contoso.onmicrosoft.com/`)
    ///
    /// The environment and realm are taken from the authority's host and first
    /// path segment.
    pub fn new(client_id: ClientId, authority: impl Into<String>, scopes: ScopeSet) -> Self {
        let authority = authority.into();
        let environment = host_of(&authority);
        let realm = authority_tenant(&authority).to_owned();
        Self {
            client_id,
            authority,
            environment,
            realm,
            scopes,
            obo_cache_key: None,
            token_type: None,
            key_id: None,
        }
    }

    /// Marks the request as made on behalf of the assertion with the given hash
    pub fn on_behalf_of(mut self, obo_cache_key: impl Into<String>) -> Self {
        self.obo_cache_key = Some(obo_cache_key.into());
        self
    }

    /// Records a proof-of-possession key the token is bound to
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Overrides the token type reported by the response
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// The requesting client
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The authority URL
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The authority's host
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The tenant named by the authority
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// The scopes requested
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// The on-behalf-of assertion hash, if any
    pub fn obo_cache_key(&self) -> Option<&str> {
        self.obo_cache_key.as_deref()
    }

    pub(crate) fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    pub(crate) fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
}

fn authority_tenant(authority: &str) -> &str {
    let rest = authority
        .split_once("://")
        .map_or(authority, |(_, rest)| rest);
    rest.split('/')
        .nth(1)
        .and_then(|tenant| tenant.split(['?', '#']).next())
        .unwrap_or_default()
}
