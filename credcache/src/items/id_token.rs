use serde::{Deserialize, Serialize};

use super::{AdditionalFields, ClientInfo, IdTokenClaims, IdTokenType};
use crate::{ClientId, Secret};

/// A cached ID token
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenItem {
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
    /// The raw JWT
    #[serde(default)]
    pub secret: Secret,
    /// Always `IdToken`
    #[serde(default)]
    pub credential_type: IdTokenType,
    /// The tenant
    #[serde(default)]
    pub realm: String,
    /// Properties not recognized by this version
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl IdTokenItem {
    /// Decodes the claims carried by the token
    pub fn claims(&self) -> IdTokenClaims {
        IdTokenClaims::parse(self.secret.as_str())
    }

    /// Decodes the client info, if any was cached
    pub fn client_info(&self) -> Option<ClientInfo> {
        ClientInfo::parse(&self.raw_client_info)
    }
}
