//! Cache key derivation
//!
//! Two keys are derived from every item. The composite key is the dash-joined
//! string used inside the accessor and as the property name in the v3 format.
//! The platform key is the `(service, account, generic, type)` tuple used by
//! keychain-style credential stores. Both are shared with other SDKs, so every
//! segment and type code here is a wire contract.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::items::{
    AccessTokenItem, AccountItem, AppMetadataItem, AuthorityType, IdTokenItem, RefreshTokenItem,
};

const SEPARATOR: &str = "-";
const ACCESS_TOKEN: &str = "accesstoken";
const REFRESH_TOKEN: &str = "refreshtoken";
const ID_TOKEN: &str = "idtoken";
const APP_METADATA: &str = "appmetadata";

/// The type code of a platform key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// An Azure AD v1 account
    AadAccount,
    /// A Microsoft personal account
    MsaAccount,
    /// An account from the converged v2 security token service
    MsStsAccount,
    /// An account from any other authority
    OtherAccount,
    /// An access token
    AccessToken,
    /// A refresh token
    RefreshToken,
    /// An ID token
    IdToken,
    /// App metadata
    AppMetadata,
}

impl KeyType {
    /// The numeric code stored alongside the key
    pub const fn code(self) -> u32 {
        match self {
            Self::AadAccount => 1001,
            Self::MsaAccount => 1002,
            Self::MsStsAccount => 1003,
            Self::OtherAccount => 1004,
            Self::AccessToken => 2001,
            Self::RefreshToken => 2002,
            Self::IdToken => 2003,
            Self::AppMetadata => 3001,
        }
    }
}

impl From<AuthorityType> for KeyType {
    fn from(authority: AuthorityType) -> Self {
        match authority {
            AuthorityType::Aad => Self::AadAccount,
            AuthorityType::Msa => Self::MsaAccount,
            AuthorityType::MsSts => Self::MsStsAccount,
            AuthorityType::Other => Self::OtherAccount,
        }
    }
}

/// A key for keychain-style stores
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlatformKey {
    /// The service attribute
    pub service: String,
    /// The account attribute
    pub account: String,
    /// The generic attribute
    pub generic: String,
    /// The type attribute
    pub key_type: KeyType,
}

impl PlatformKey {
    /// The numeric type code
    #[inline]
    pub fn type_code(&self) -> u32 {
        self.key_type.code()
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.service,
            self.account,
            self.generic,
            self.type_code()
        )
    }
}

fn join(segments: &[&str]) -> String {
    segments.join(SEPARATOR).to_lowercase()
}

fn account_key(home_account_id: &str, environment: &str) -> String {
    join(&[home_account_id, environment])
}

impl AccessTokenItem {
    /// The composite key of the token
    pub fn cache_key(&self) -> String {
        let mut segments = vec![
            self.home_account_id.as_str(),
            self.environment.as_str(),
            ACCESS_TOKEN,
            self.client_id.as_str(),
            self.realm.as_str(),
            self.target.as_str(),
        ];
        if !self.is_bearer() {
            segments.push(&self.token_type);
        }
        join(&segments)
    }

    /// The platform key of the token
    pub fn platform_key(&self) -> PlatformKey {
        let mut service = vec![
            ACCESS_TOKEN,
            self.client_id.as_str(),
            self.realm.as_str(),
            self.target.as_str(),
        ];
        if !self.is_bearer() {
            service.push(&self.token_type);
        }

        PlatformKey {
            service: join(&service),
            account: account_key(self.home_account_id.as_str(), &self.environment),
            generic: join(&[ACCESS_TOKEN, self.client_id.as_str(), self.realm.as_str()]),
            key_type: KeyType::AccessToken,
        }
    }
}

impl RefreshTokenItem {
    /// The composite key of the token
    ///
    /// Family tokens are keyed by family, so an ordinary token and a family
    /// token for the same user coexist.
    pub fn cache_key(&self) -> String {
        join(&[
            self.home_account_id.as_str(),
            self.environment.as_str(),
            REFRESH_TOKEN,
            self.key_id(),
            "",
            "",
        ])
    }

    /// The platform key of the token
    pub fn platform_key(&self) -> PlatformKey {
        PlatformKey {
            service: join(&[REFRESH_TOKEN, self.key_id(), "", ""]),
            account: account_key(self.home_account_id.as_str(), &self.environment),
            generic: join(&[REFRESH_TOKEN, self.key_id(), ""]),
            key_type: KeyType::RefreshToken,
        }
    }
}

impl IdTokenItem {
    /// The composite key of the token
    pub fn cache_key(&self) -> String {
        join(&[
            self.home_account_id.as_str(),
            self.environment.as_str(),
            ID_TOKEN,
            self.client_id.as_str(),
            self.realm.as_str(),
            "",
        ])
    }

    /// The platform key of the token
    pub fn platform_key(&self) -> PlatformKey {
        PlatformKey {
            service: join(&[ID_TOKEN, self.client_id.as_str(), self.realm.as_str(), ""]),
            account: account_key(self.home_account_id.as_str(), &self.environment),
            generic: join(&[ID_TOKEN, self.client_id.as_str(), self.realm.as_str()]),
            key_type: KeyType::IdToken,
        }
    }
}

impl AccountItem {
    /// The composite key of the account
    pub fn cache_key(&self) -> String {
        join(&[self.home_account_id.as_str(), self.environment.as_str(), self.realm.as_str()])
    }

    /// The platform key of the account
    ///
    /// Accounts are tenant-qualified through the service attribute.
    pub fn platform_key(&self) -> PlatformKey {
        PlatformKey {
            service: self.realm.to_lowercase(),
            account: account_key(self.home_account_id.as_str(), &self.environment),
            generic: self.username.to_lowercase(),
            key_type: KeyType::from(self.authority_type()),
        }
    }
}

impl AppMetadataItem {
    /// The composite key of the metadata record
    pub fn cache_key(&self) -> String {
        join(&[APP_METADATA, self.environment.as_str(), self.client_id.as_str()])
    }

    /// The platform key of the metadata record
    pub fn platform_key(&self) -> PlatformKey {
        PlatformKey {
            service: join(&[APP_METADATA, self.client_id.as_str()]),
            account: self.environment.to_lowercase(),
            generic: "1".to_owned(),
            key_type: KeyType::AppMetadata,
        }
    }
}

/// The partition of an application token store
pub fn app_partition_key(client_id: &str, realm: &str) -> String {
    format!("{client_id}_{realm}_AppTokenCache")
}

/// The cache key for tokens obtained on behalf of `assertion`
///
/// This is the unpadded base64url SHA-256 digest of the assertion, so the
/// inbound token itself is never stored.
pub fn obo_cache_key_for(assertion: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, assertion.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientId, Secret};

    const CLIENT_ID: &str = "b6c69a37-df96-4db0-9088-2ab96e1d8215";
    const TENANT: &str = "f645ad92-e38d-4d1a-b510-d1b09a74a8ca";
    const HOME_ACCOUNT: &str =
        "9f4880d8-80ba-4c40-97bc-f7a23c703084.f645ad92-e38d-4d1a-b510-d1b09a74a8ca";
    const ENVIRONMENT: &str = "login.microsoftonline.com";
    const ACCOUNT_KEY: &str = "9f4880d8-80ba-4c40-97bc-f7a23c703084.f645ad92-e38d-4d1a-b510-d1b09a74a8ca-login.microsoftonline.com";

    fn access_token() -> AccessTokenItem {
        AccessTokenItem {
            home_account_id: HOME_ACCOUNT.into(),
            environment: ENVIRONMENT.into(),
            client_id: ClientId::from_static(CLIENT_ID),
            secret: Secret::from_static("<removed_at>"),
            realm: TENANT.into(),
            target: "Calendars.Read email openid profile Tasks.Read User.Read".into(),
            ..AccessTokenItem::default()
        }
    }

    fn refresh_token() -> RefreshTokenItem {
        RefreshTokenItem {
            home_account_id: HOME_ACCOUNT.into(),
            environment: ENVIRONMENT.into(),
            client_id: ClientId::from_static(CLIENT_ID),
            secret: Secret::from_static("<removed_rt>"),
            ..RefreshTokenItem::default()
        }
    }

    #[test]
    fn access_token_keys() {
        let at = access_token();
        let key = at.platform_key();

        assert_eq!(
            key.service,
            "accesstoken-b6c69a37-df96-4db0-9088-2ab96e1d8215-f645ad92-e38d-4d1a-b510-d1b09a74a8ca-calendars.read email openid profile tasks.read user.read"
        );
        assert_eq!(key.account, ACCOUNT_KEY);
        assert_eq!(
            key.generic,
            "accesstoken-b6c69a37-df96-4db0-9088-2ab96e1d8215-f645ad92-e38d-4d1a-b510-d1b09a74a8ca"
        );
        assert_eq!(key.type_code(), 2001);

        assert_eq!(
            at.cache_key(),
            format!("{ACCOUNT_KEY}-{}", key.service)
        );
    }

    #[test]
    fn pop_tokens_are_distinct_from_bearer_tokens() {
        let bearer = access_token();
        let pop = AccessTokenItem {
            token_type: "pop".into(),
            ..access_token()
        };

        assert_ne!(bearer.cache_key(), pop.cache_key());
        assert!(pop.cache_key().ends_with("-pop"));
        assert!(pop.platform_key().service.ends_with("-pop"));
        assert_eq!(bearer.platform_key().generic, pop.platform_key().generic);
    }

    #[test]
    fn refresh_token_keys() {
        let key = refresh_token().platform_key();
        assert_eq!(key.service, "refreshtoken-b6c69a37-df96-4db0-9088-2ab96e1d8215--");
        assert_eq!(key.account, ACCOUNT_KEY);
        assert_eq!(key.generic, "refreshtoken-b6c69a37-df96-4db0-9088-2ab96e1d8215-");
        assert_eq!(key.type_code(), 2002);
    }

    #[test]
    fn null_and_empty_family_ids_produce_the_same_key() {
        let null_family = refresh_token();
        let empty_family = RefreshTokenItem {
            family_id: Some(String::new()),
            ..refresh_token()
        };

        assert_eq!(null_family.cache_key(), empty_family.cache_key());
        assert_eq!(null_family.platform_key(), empty_family.platform_key());
    }

    #[test]
    fn family_refresh_tokens_are_keyed_by_family() {
        let frt = RefreshTokenItem {
            family_id: Some("1".into()),
            ..refresh_token()
        };

        assert_eq!(frt.platform_key().service, "refreshtoken-1--");
        assert_eq!(frt.cache_key(), format!("{ACCOUNT_KEY}-refreshtoken-1--"));
        assert_ne!(frt.cache_key(), refresh_token().cache_key());
    }

    #[test]
    fn id_token_keys() {
        let idt = IdTokenItem {
            home_account_id: HOME_ACCOUNT.into(),
            environment: ENVIRONMENT.into(),
            client_id: ClientId::from_static(CLIENT_ID),
            realm: TENANT.into(),
            ..IdTokenItem::default()
        };
        let key = idt.platform_key();

        assert_eq!(
            key.service,
            "idtoken-b6c69a37-df96-4db0-9088-2ab96e1d8215-f645ad92-e38d-4d1a-b510-d1b09a74a8ca-"
        );
        assert_eq!(
            key.generic,
            "idtoken-b6c69a37-df96-4db0-9088-2ab96e1d8215-f645ad92-e38d-4d1a-b510-d1b09a74a8ca"
        );
        assert_eq!(key.account, ACCOUNT_KEY);
        assert_eq!(key.type_code(), 2003);
    }

    #[test]
    fn account_keys() {
        let account = AccountItem {
            home_account_id: HOME_ACCOUNT.into(),
            environment: ENVIRONMENT.into(),
            username: "idlab@msidlab4.onmicrosoft.com".into(),
            authority_type: "MSSTS".into(),
            realm: TENANT.into(),
            ..AccountItem::default()
        };
        let key = account.platform_key();

        assert_eq!(key.service, TENANT);
        assert_eq!(key.account, ACCOUNT_KEY);
        assert_eq!(key.generic, "idlab@msidlab4.onmicrosoft.com");
        assert_eq!(key.type_code(), 1003);
        assert_eq!(account.cache_key(), format!("{ACCOUNT_KEY}-{TENANT}"));

        let msa = AccountItem {
            authority_type: "MSA".into(),
            ..account
        };
        assert_eq!(msa.platform_key().type_code(), 1002);
    }

    #[test]
    fn app_metadata_keys() {
        let metadata =
            AppMetadataItem::new(ClientId::from_static(CLIENT_ID), ENVIRONMENT, Some("1".into()));
        let key = metadata.platform_key();

        assert_eq!(key.service, "appmetadata-b6c69a37-df96-4db0-9088-2ab96e1d8215");
        assert_eq!(key.account, ENVIRONMENT);
        assert_eq!(key.generic, "1");
        assert_eq!(key.type_code(), 3001);
        assert_eq!(
            metadata.cache_key(),
            "appmetadata-login.microsoftonline.com-b6c69a37-df96-4db0-9088-2ab96e1d8215"
        );
    }

    #[test]
    fn keys_are_lowercase() {
        let at = AccessTokenItem {
            environment: "Login.MicrosoftOnline.COM".into(),
            ..access_token()
        };
        assert_eq!(at.cache_key(), access_token().cache_key());
    }

    #[test]
    fn obo_keys_are_unpadded_base64url_sha256() {
        assert_eq!(
            obo_cache_key_for("abc"),
            "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0"
        );
    }
}
