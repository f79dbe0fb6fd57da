//! Error types surfaced by the cache engine

use std::{error, fmt};

use thiserror::Error;

/// A boxed error returned by pluggable collaborators such as hooks and legacy persistence
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Maximum number of characters of an offending payload echoed into a malformed-input error
pub const MALFORMED_EXCERPT_LEN: usize = 5;

/// The codec that rejected an input buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    /// The structured, nested-by-type JSON format
    V3,
    /// The flat dictionary format written by the previous library generation
    Dictionary,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::V3 => f.write_str("v3"),
            Self::Dictionary => f.write_str("dictionary"),
        }
    }
}

/// A point in the notification pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationStage {
    /// Fired before the cache is read or written
    BeforeAccess,
    /// Fired before the cache is mutated
    BeforeWrite,
    /// Fired once the operation completes, regardless of outcome
    AfterAccess,
}

impl fmt::Display for NotificationStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BeforeAccess => f.write_str("before access"),
            Self::BeforeWrite => f.write_str("before write"),
            Self::AfterAccess => f.write_str("after access"),
        }
    }
}

/// An error produced by the token cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The input buffer could not be read by the selected codec
    #[error("{codec} cache payload is malformed (starts with {excerpt:?})")]
    MalformedInput {
        /// The codec that rejected the payload
        codec: Codec,
        /// A short, length-capped prefix of the payload
        excerpt: String,
        /// The underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// The operation is not supported by this kind of cache store
    #[error("{operation} is not supported by the application token cache")]
    UnsupportedOperation {
        /// A short name for the rejected operation
        operation: &'static str,
    },

    /// A registered notification hook failed
    #[error("{stage} notification hook failed")]
    Hook {
        /// The stage whose hook failed
        stage: NotificationStage,
        /// The error returned by the hook
        #[source]
        source: BoxError,
    },

    /// The operation was cancelled before it completed
    #[error("cache operation was cancelled")]
    Cancelled,

    /// The cache contents could not be serialized
    #[error("unable to serialize cache contents")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Builds a malformed-input error, retaining only a short prefix of the payload
    pub(crate) fn malformed(codec: Codec, payload: &[u8], source: serde_json::Error) -> Self {
        let excerpt = String::from_utf8_lossy(payload)
            .chars()
            .take(MALFORMED_EXCERPT_LEN)
            .collect();

        Self::MalformedInput {
            codec,
            excerpt,
            source,
        }
    }

    pub(crate) const fn unsupported(operation: &'static str) -> Self {
        Self::UnsupportedOperation { operation }
    }

    /// Whether this error indicates malformed input
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::MalformedInput { .. })
    }
}
