use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim().trim_end_matches('='))
        .ok()
}

/// The decoded client info blob returned alongside user tokens
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// The user's object id in their home tenant
    #[serde(default)]
    pub uid: String,
    /// The user's home tenant
    #[serde(default)]
    pub utid: String,
}

impl ClientInfo {
    /// Decodes a base64url client info blob
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }

        let bytes = decode_segment(raw)?;
        match serde_json::from_slice(&bytes) {
            Ok(info) => Some(info),
            Err(error) => {
                tracing::debug!(%error, "client info is not valid JSON");
                None
            }
        }
    }

    /// Encodes the client info as a base64url blob
    pub fn to_raw(&self) -> String {
        let json = serde_json::json!({ "uid": self.uid, "utid": self.utid });
        URL_SAFE_NO_PAD.encode(json.to_string())
    }

    /// The home account id, `{uid}.{utid}`
    pub fn home_account_id(&self) -> String {
        format!("{}.{}", self.uid, self.utid)
    }
}

/// The subset of ID token claims used to populate account records
///
/// The token signature is not validated; the token was received directly from
/// the token endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct IdTokenClaims {
    /// Object id
    #[serde(default)]
    pub oid: Option<String>,
    /// Subject
    #[serde(default)]
    pub sub: Option<String>,
    /// Tenant id
    #[serde(default)]
    pub tid: Option<String>,
    /// Preferred username
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// User principal name
    #[serde(default)]
    pub upn: Option<String>,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Full name
    #[serde(default)]
    pub name: Option<String>,
    /// Given name
    #[serde(default)]
    pub given_name: Option<String>,
    /// Family name
    #[serde(default)]
    pub family_name: Option<String>,
}

impl IdTokenClaims {
    /// Decodes the payload of a JWT without checking its signature
    ///
    /// Anything that cannot be decoded yields empty claims.
    pub fn parse(jwt: &str) -> Self {
        let claims = jwt
            .split('.')
            .nth(1)
            .and_then(decode_segment)
            .and_then(|payload| serde_json::from_slice(&payload).ok());

        match claims {
            Some(claims) => claims,
            None => {
                tracing::debug!("unable to decode ID token claims");
                Self::default()
            }
        }
    }

    /// The displayable username
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.upn.as_deref())
            .or(self.email.as_deref())
    }

    /// The object id, falling back to the subject
    pub fn object_id(&self) -> Option<&str> {
        self.oid.as_deref().or(self.sub.as_deref())
    }
}

/// Builds an unsigned ID token carrying `claims`
#[cfg(test)]
pub(crate) fn unsigned_jwt(claims: serde_json::Value) -> String {
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_info_round_trip() {
        let info = ClientInfo {
            uid: "uid".into(),
            utid: "utid".into(),
        };

        let parsed = ClientInfo::parse(&info.to_raw()).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.home_account_id(), "uid.utid");
    }

    #[test]
    fn padded_client_info_is_accepted() {
        // {"uid":"u","utid":"t"} with standard padding
        let parsed = ClientInfo::parse("eyJ1aWQiOiJ1IiwidXRpZCI6InQifQ==").unwrap();
        assert_eq!(parsed.home_account_id(), "u.t");
    }

    #[test]
    fn garbage_client_info_is_none() {
        assert_eq!(ClientInfo::parse(""), None);
        assert_eq!(ClientInfo::parse("%%%"), None);
        assert_eq!(ClientInfo::parse("bm90IGpzb24"), None);
    }

    #[test]
    fn claims_from_unsigned_token() {
        let jwt = unsigned_jwt(json!({
            "oid": "object",
            "tid": "tenant",
            "upn": "user@contoso.com",
            "name": "A User",
        }));

        let claims = IdTokenClaims::parse(&jwt);
        assert_eq!(claims.object_id(), Some("object"));
        assert_eq!(claims.username(), Some("user@contoso.com"));
        assert_eq!(claims.tid.as_deref(), Some("tenant"));
    }

    #[test]
    fn undecodable_claims_are_empty() {
        assert_eq!(IdTokenClaims::parse("not-a-jwt"), IdTokenClaims::default());
        assert_eq!(IdTokenClaims::parse("a.!!!.c"), IdTokenClaims::default());
    }
}
