//! The binary layout of the legacy cache
//!
//! The buffer starts with a little-endian `i32` schema version followed by an
//! `i32` entry count. Each entry is a key string and a value string, both
//! prefixed by their UTF-8 byte length as a 7-bit variable-length integer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::items::{AdditionalFields, ClientInfo};

/// The only schema version understood by this crate
pub(crate) const SCHEMA_VERSION: i32 = 3;

const DELIMITER: &str = ":::";

/// Subject type recorded for tokens issued to a user
pub(crate) const SUBJECT_USER: i32 = 0;

/// An error reading or writing the legacy binary layout
#[derive(Debug, Error)]
pub enum LegacyFormatError {
    /// The buffer ended before a complete value could be read
    #[error("legacy cache buffer is truncated")]
    Truncated,
    /// A length prefix was negative or did not terminate
    #[error("legacy cache buffer has an invalid length prefix")]
    InvalidLength,
    /// A string was not valid UTF-8
    #[error("legacy cache buffer contains invalid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// A key did not have the expected number of segments
    #[error("legacy cache key has {0} segments")]
    KeyArity(usize),
    /// A key's subject type was not numeric
    #[error("legacy cache key has a non-numeric subject type")]
    SubjectType(#[from] std::num::ParseIntError),
    /// An entry's value was not the expected JSON document
    #[error("legacy cache entry is malformed")]
    Payload(#[from] serde_json::Error),
    /// The buffer holds more entries than can be counted
    #[error("legacy cache holds too many entries")]
    TooManyEntries,
}

/// Identifies one entry of the legacy cache
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LegacyKey {
    /// The full authority URL the token was issued by
    pub authority: String,
    /// The resource the token was issued for
    pub resource: String,
    /// The client the token was issued to
    pub client_id: String,
    /// The subject type code
    pub subject_type: i32,
    /// The stable identifier of the user
    pub unique_id: String,
    /// The displayable (user principal) name of the user
    pub displayable_id: String,
}

impl LegacyKey {
    /// The host portion of the authority, lowercased
    pub fn environment(&self) -> String {
        host_of(&self.authority)
    }

    fn to_wire(&self) -> String {
        [
            self.authority.as_str(),
            self.resource.as_str(),
            self.client_id.as_str(),
            &self.subject_type.to_string(),
            self.unique_id.as_str(),
            self.displayable_id.as_str(),
        ]
        .join(DELIMITER)
    }

    fn from_wire(value: &str) -> Result<Self, LegacyFormatError> {
        let parts: Vec<&str> = value.split(DELIMITER).collect();
        let [authority, resource, client_id, subject_type, unique_id, displayable_id] =
            parts.as_slice()
        else {
            return Err(LegacyFormatError::KeyArity(parts.len()));
        };

        Ok(Self {
            authority: (*authority).to_owned(),
            resource: (*resource).to_owned(),
            client_id: (*client_id).to_owned(),
            subject_type: subject_type.parse()?,
            unique_id: (*unique_id).to_owned(),
            displayable_id: (*displayable_id).to_owned(),
        })
    }
}

/// Extracts the host from an authority URL such as `https://login.windows.net/common/`
pub(crate) fn host_of(authority: &str) -> String {
    let rest = authority
        .split_once("://")
        .map_or(authority, |(_, rest)| rest);
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, host)| host);
    let host = host.split(':').next().unwrap_or_default();
    host.to_ascii_lowercase()
}

/// The user a legacy entry was issued for
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyUserInfo {
    /// The stable identifier of the user
    #[serde(rename = "UniqueId", default)]
    pub unique_id: Option<String>,
    /// The displayable (user principal) name of the user
    #[serde(rename = "DisplayableId", default)]
    pub displayable_id: Option<String>,
    #[serde(flatten)]
    pub(crate) additional_fields: AdditionalFields,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct LegacyResult {
    #[serde(rename = "UserInfo", default)]
    pub(crate) user_info: LegacyUserInfo,
    #[serde(flatten)]
    pub(crate) additional_fields: AdditionalFields,
}

/// The value stored under a legacy key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntry {
    /// The base64url client info blob, absent for entries written before it existed
    #[serde(rename = "RawClientInfo", default)]
    pub raw_client_info: Option<String>,
    /// The refresh token
    #[serde(rename = "RefreshToken", default)]
    pub refresh_token: Option<String>,
    /// The resource echoed by the token endpoint
    #[serde(rename = "ResourceInResponse", default)]
    pub resource_in_response: Option<String>,
    #[serde(rename = "Result", default)]
    pub(crate) result: LegacyResult,
    #[serde(flatten)]
    pub(crate) additional_fields: AdditionalFields,
}

impl LegacyEntry {
    /// The user this entry was issued for
    pub fn user_info(&self) -> &LegacyUserInfo {
        &self.result.user_info
    }

    /// The raw client info, if present and non-empty
    pub fn raw_client_info(&self) -> Option<&str> {
        self.raw_client_info.as_deref().filter(|s| !s.is_empty())
    }

    /// The home account identifier derived from the client info
    pub fn home_account_id(&self) -> Option<String> {
        self.raw_client_info()
            .and_then(ClientInfo::parse)
            .map(|info| info.home_account_id())
    }

    pub(crate) fn for_user(
        raw_client_info: Option<String>,
        refresh_token: String,
        resource: String,
        unique_id: String,
        displayable_id: String,
    ) -> Self {
        Self {
            raw_client_info,
            refresh_token: Some(refresh_token),
            resource_in_response: Some(resource),
            result: LegacyResult {
                user_info: LegacyUserInfo {
                    unique_id: Some(unique_id),
                    displayable_id: Some(displayable_id),
                    additional_fields: AdditionalFields::new(),
                },
                additional_fields: AdditionalFields::new(),
            },
            additional_fields: AdditionalFields::new(),
        }
    }
}

/// The decoded contents of a legacy cache
pub(crate) type LegacyEntries = BTreeMap<LegacyKey, LegacyEntry>;

/// Decodes a legacy buffer
///
/// An empty buffer, or one written with an unknown schema version, decodes as
/// an empty cache.
pub(crate) fn decode(data: &[u8]) -> Result<LegacyEntries, LegacyFormatError> {
    let mut entries = LegacyEntries::new();
    if data.is_empty() {
        return Ok(entries);
    }

    let mut reader = Reader { data };
    let version = reader.read_i32()?;
    if version != SCHEMA_VERSION {
        tracing::warn!(version, "ignoring legacy cache with unknown schema version");
        return Ok(entries);
    }

    let count = reader.read_i32()?;
    for _ in 0..count {
        let key = LegacyKey::from_wire(&reader.read_string()?)?;
        let entry = serde_json::from_str(&reader.read_string()?)?;
        entries.insert(key, entry);
    }

    tracing::trace!(entries = entries.len(), "read legacy cache");
    Ok(entries)
}

/// Encodes a legacy cache
pub(crate) fn encode(entries: &LegacyEntries) -> Result<Vec<u8>, LegacyFormatError> {
    let count = i32::try_from(entries.len()).map_err(|_| LegacyFormatError::TooManyEntries)?;

    let mut out = Vec::new();
    out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    for (key, entry) in entries {
        write_string(&mut out, &key.to_wire());
        write_string(&mut out, &serde_json::to_string(entry)?);
    }

    Ok(out)
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], LegacyFormatError> {
        if self.data.len() < len {
            return Err(LegacyFormatError::Truncated);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn read_i32(&mut self) -> Result<i32, LegacyFormatError> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_len(&mut self) -> Result<usize, LegacyFormatError> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.take(1)?[0];
            value |= u32::from(byte & 0x7f)
                .checked_shl(shift)
                .ok_or(LegacyFormatError::InvalidLength)?;
            if byte & 0x80 == 0 {
                return usize::try_from(value).map_err(|_| LegacyFormatError::InvalidLength);
            }
        }
        Err(LegacyFormatError::InvalidLength)
    }

    fn read_string(&mut self) -> Result<String, LegacyFormatError> {
        let len = self.read_len()?;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    let mut len = value.len();
    while len >= 0x80 {
        out.push((len as u8 & 0x7f) | 0x80);
        len >>= 7;
    }
    out.push(len as u8);
    out.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(displayable_id: &str) -> LegacyKey {
        LegacyKey {
            authority: "https://login.windows.net/common/".into(),
            resource: "https://graph.windows.net".into(),
            client_id: "client".into(),
            subject_type: SUBJECT_USER,
            unique_id: "uid".into(),
            displayable_id: displayable_id.into(),
        }
    }

    #[test]
    fn empty_buffer_is_an_empty_cache() -> color_eyre::Result<()> {
        assert!(decode(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn encodes_the_version_and_count_headers() -> color_eyre::Result<()> {
        let mut entries = LegacyEntries::new();
        entries.insert(key("user@contoso.com"), LegacyEntry::default());

        let data = encode(&entries)?;
        assert_eq!(&data[..4], &3i32.to_le_bytes());
        assert_eq!(&data[4..8], &1i32.to_le_bytes());

        let decoded = decode(&data)?;
        assert_eq!(decoded, entries);
        Ok(())
    }

    #[test]
    fn long_strings_use_multi_byte_length_prefixes() -> color_eyre::Result<()> {
        let long_name = "x".repeat(300);
        let mut out = Vec::new();
        write_string(&mut out, &long_name);
        assert_eq!(&out[..2], &[0xac, 0x02]);

        let mut reader = Reader { data: &out };
        assert_eq!(reader.read_string()?, long_name);
        Ok(())
    }

    #[test]
    fn unknown_versions_read_as_empty() -> color_eyre::Result<()> {
        let mut data = 2i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xff; 16]);
        assert!(decode(&data)?.is_empty());
        Ok(())
    }

    #[test]
    fn truncated_buffers_are_errors() -> color_eyre::Result<()> {
        let mut entries = LegacyEntries::new();
        entries.insert(key("user@contoso.com"), LegacyEntry::default());
        let data = encode(&entries)?;

        let err = decode(&data[..data.len() - 3]).unwrap_err();
        assert!(matches!(err, LegacyFormatError::Truncated));
        Ok(())
    }

    #[test]
    fn keys_need_six_segments() {
        let err = LegacyKey::from_wire("a:::b:::c").unwrap_err();
        assert!(matches!(err, LegacyFormatError::KeyArity(3)));
    }

    #[test]
    fn unknown_value_fields_are_kept() -> color_eyre::Result<()> {
        let entry: LegacyEntry = serde_json::from_str(
            r#"{"RefreshToken":"rt","Result":{"AccessToken":"at","UserInfo":{"UniqueId":"u","GivenName":"g"}},"Extra":1}"#,
        )?;
        let reread: serde_json::Value = serde_json::to_value(&entry)?;
        assert_eq!(reread["Extra"], 1);
        assert_eq!(reread["Result"]["AccessToken"], "at");
        assert_eq!(reread["Result"]["UserInfo"]["GivenName"], "g");
        Ok(())
    }

    #[test]
    fn authority_hosts() {
        assert_eq!(host_of("https://Login.Windows.net/common/"), "login.windows.net");
        assert_eq!(host_of("https://login.microsoftonline.com:443/tenant"), "login.microsoftonline.com");
        assert_eq!(host_of("login.windows.net"), "login.windows.net");
    }
}
