//! Serde helpers encoding [`UnixTime`] as a decimal string
//!
//! Timestamps are always written as strings so that no consumer parses them
//! as floating point numbers. Readers accept either a decimal string or a JSON
//! integer, since some older writers emitted native numbers.
//!
//! ```
//! use credcache_clock::UnixTime;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Stamp {
//!     #[serde(with = "credcache_clock::string_timestamp")]
//!     at: UnixTime,
//! }
//!
//! let json = serde_json::to_string(&Stamp { at: UnixTime(1548803419) }).unwrap();
//! assert_eq!(json, r#"{"at":"1548803419"}"#);
//! ```

use std::fmt;

use serde::{de, Deserializer, Serializer};

use crate::UnixTime;

/// Serializes a timestamp as a decimal string
pub fn serialize<S: Serializer>(time: &UnixTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.0)
}

/// Deserializes a timestamp from a decimal string or an integer
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UnixTime, D::Error> {
    deserializer.deserialize_any(TimestampVisitor)
}

struct TimestampVisitor;

impl<'de> de::Visitor<'de> for TimestampVisitor {
    type Value = UnixTime;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a Unix timestamp as a decimal string or integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(UnixTime(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(UnixTime)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.trim()
            .parse::<u64>()
            .map(UnixTime)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

/// Serde helpers for an optional timestamp
///
/// Absent values and empty strings both read as `None`.
pub mod option {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    use crate::UnixTime;

    /// Serializes an optional timestamp as a decimal string
    pub fn serialize<S: Serializer>(
        time: &Option<UnixTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => serializer.collect_str(&t.0),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional timestamp
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<UnixTime>, D::Error> {
        deserializer.deserialize_any(OptionalVisitor)
    }

    struct OptionalVisitor;

    impl<'de> de::Visitor<'de> for OptionalVisitor {
        type Value = Option<UnixTime>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an optional Unix timestamp")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            super::TimestampVisitor.visit_u64(v).map(Some)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            super::TimestampVisitor.visit_i64(v).map(Some)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            if v.trim().is_empty() {
                Ok(None)
            } else {
                super::TimestampVisitor.visit_str(v).map(Some)
            }
        }
    }
}
