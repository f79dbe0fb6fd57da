use serde::{Deserialize, Serialize};

use super::{non_empty, AdditionalFields};
use crate::ClientId;

/// Records which family, if any, a client belongs to
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetadataItem {
    /// The client
    #[serde(default)]
    pub client_id: ClientId,
    /// The host of the issuing authority
    #[serde(default)]
    pub environment: String,
    /// The family the client belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    /// Properties not recognized by this version
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl AppMetadataItem {
    /// Creates a metadata record
    pub fn new(
        client_id: ClientId,
        environment: impl Into<String>,
        family_id: Option<String>,
    ) -> Self {
        Self {
            client_id,
            environment: environment.into(),
            family_id,
            additional_fields: AdditionalFields::new(),
        }
    }

    /// The family id, treating an empty string as absent
    #[inline]
    pub fn family_id(&self) -> Option<&str> {
        non_empty(&self.family_id)
    }
}
