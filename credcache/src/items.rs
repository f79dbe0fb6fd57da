//! Cache item records
//!
//! Every item carries the base shape shared by all credentials (`environment`,
//! `home_account_id`, and the raw client info blob) plus a bag of properties this
//! version of the library does not recognize. That bag is written back verbatim so
//! that caches shared with newer writers lose nothing on a read-modify-write cycle.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

mod access_token;
mod account;
mod app_metadata;
mod client_info;
mod id_token;
mod refresh_token;

pub use access_token::{AccessTokenItem, BEARER};
pub use account::{AccountItem, AuthorityType};
pub use app_metadata::AppMetadataItem;
pub use client_info::{ClientInfo, IdTokenClaims};
#[cfg(test)]
pub(crate) use client_info::unsigned_jwt;
pub use id_token::IdTokenItem;
pub use refresh_token::RefreshTokenItem;

/// Unrecognized JSON properties preserved in the order they were read
pub type AdditionalFields = serde_json::Map<String, serde_json::Value>;

macro_rules! credential_type {
    ($(#[$meta:meta])* $name:ident => $wire:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name;

        impl $name {
            /// The value written to the `credential_type` property
            pub const WIRE: &'static str = $wire;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(Self::WIRE)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(Self::WIRE)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                if value.eq_ignore_ascii_case(Self::WIRE) {
                    Ok(Self)
                } else {
                    Err(de::Error::invalid_value(
                        de::Unexpected::Str(&value),
                        &Self::WIRE,
                    ))
                }
            }
        }
    };
}

credential_type! {
    /// Marks an item as an access token
    AccessTokenType => "AccessToken"
}

credential_type! {
    /// Marks an item as a refresh token
    RefreshTokenType => "RefreshToken"
}

credential_type! {
    /// Marks an item as an ID token
    IdTokenType => "IdToken"
}

/// Treats a missing or empty optional string as absent
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
