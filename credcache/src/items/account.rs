use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use super::{AdditionalFields, ClientInfo, IdTokenClaims};

/// The kind of authority an account was authenticated against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthorityType {
    /// Azure AD v1
    Aad,
    /// Microsoft personal accounts
    Msa,
    /// The converged v2 security token service
    MsSts,
    /// Any other authority, such as B2C or generic OIDC providers
    Other,
}

impl AuthorityType {
    /// Reads the authority type from its wire value, falling back to [`Other`](Self::Other)
    pub fn from_wire(value: &str) -> Self {
        if value.eq_ignore_ascii_case("MSSTS") {
            Self::MsSts
        } else if value.eq_ignore_ascii_case("AAD") {
            Self::Aad
        } else if value.eq_ignore_ascii_case("MSA") {
            Self::Msa
        } else {
            Self::Other
        }
    }

    /// The wire value
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aad => "AAD",
            Self::Msa => "MSA",
            Self::MsSts => "MSSTS",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for AuthorityType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_authority_type() -> String {
    AuthorityType::MsSts.as_str().to_owned()
}

/// A cached account record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountItem {
    /// The stable identifier of the user
    #[serde(default)]
    pub home_account_id: String,
    /// The host of the issuing authority
    #[serde(default)]
    pub environment: String,
    /// The base64url client info blob echoed by the identity provider
    #[serde(rename = "client_info", default, skip_serializing_if = "String::is_empty")]
    pub raw_client_info: String,
    /// The displayable username, generally the UPN
    #[serde(default)]
    pub username: String,
    /// The full name of the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The user's given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// The user's family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// The user's object id within the tenant
    #[serde(default)]
    pub local_account_id: String,
    /// The kind of authority the account authenticated against
    #[serde(default = "default_authority_type")]
    pub authority_type: String,
    /// The tenant
    #[serde(default)]
    pub realm: String,
    /// Platform broker account ids, keyed by client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wam_account_ids: Option<BTreeMap<String, String>>,
    /// Properties not recognized by this version
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl AccountItem {
    /// Builds an account from the claims of an ID token
    pub fn from_claims(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        raw_client_info: impl Into<String>,
        claims: &IdTokenClaims,
    ) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            environment: environment.into(),
            raw_client_info: raw_client_info.into(),
            username: claims.username().unwrap_or_default().to_owned(),
            name: claims.name.clone(),
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            local_account_id: claims.object_id().unwrap_or_default().to_owned(),
            authority_type: default_authority_type(),
            realm: claims.tid.clone().unwrap_or_default(),
            wam_account_ids: None,
            additional_fields: AdditionalFields::new(),
        }
    }

    /// The parsed authority type
    pub fn authority_type(&self) -> AuthorityType {
        AuthorityType::from_wire(&self.authority_type)
    }

    /// Decodes the client info, if any was cached
    pub fn client_info(&self) -> Option<ClientInfo> {
        ClientInfo::parse(&self.raw_client_info)
    }
}
