//! Conversion between a cache store and opaque byte buffers
//!
//! Two codecs are supported. The v3 format is the nested-by-type JSON document
//! shared with other SDKs. The dictionary format is the flat layout written by
//! the previous library generation. Both deserializers share the same merge
//! semantics: with `clear` the store's tokens are replaced, otherwise incoming
//! items overwrite those with the same key and everything else is kept.
//!
//! Empty input (including a bare JSON `null`) is a no-op for both codecs.

use crate::{accessor::CacheStore, CacheError};

mod dictionary;
mod json;

/// Reads and writes the contents of a token cache
///
/// This is handed to notification hooks so that they can load the cache from,
/// or persist it to, external storage.
pub trait TokenCacheSerializer: Send + Sync {
    /// Serializes the cache in the v3 format
    fn serialize_v3(&self) -> Result<Vec<u8>, CacheError>;

    /// Loads a v3 buffer into the cache
    fn deserialize_v3(&self, data: &[u8], clear: bool) -> Result<(), CacheError>;

    /// Serializes the cache in the dictionary format
    fn serialize_dictionary(&self) -> Result<Vec<u8>, CacheError>;

    /// Loads a dictionary buffer into the cache
    fn deserialize_dictionary(&self, data: &[u8], clear: bool) -> Result<(), CacheError>;
}

impl TokenCacheSerializer for CacheStore {
    fn serialize_v3(&self) -> Result<Vec<u8>, CacheError> {
        json::serialize(&self.snapshot())
    }

    fn deserialize_v3(&self, data: &[u8], clear: bool) -> Result<(), CacheError> {
        match json::deserialize(data)? {
            Some(snapshot) => self.import(snapshot, clear),
            None => {
                tracing::debug!("ignoring empty v3 cache payload");
                Ok(())
            }
        }
    }

    fn serialize_dictionary(&self) -> Result<Vec<u8>, CacheError> {
        dictionary::serialize(&self.snapshot())
    }

    fn deserialize_dictionary(&self, data: &[u8], clear: bool) -> Result<(), CacheError> {
        match dictionary::deserialize(data)? {
            Some(snapshot) => self.import(snapshot, clear),
            None => {
                tracing::debug!("ignoring empty dictionary cache payload");
                Ok(())
            }
        }
    }
}

/// Whether a payload carries no content
fn is_blank(data: &[u8]) -> bool {
    match std::str::from_utf8(data).map(str::trim) {
        Ok(text) => text.is_empty() || text == "null",
        Err(_) => false,
    }
}
