use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The identifier of a client application registered with the identity provider
#[braid(serde)]
pub struct ClientId;

impl Default for ClientId {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// The secret material of a cached credential
///
/// Formatting hides the value unless the alternate flag is used, in which
/// case only a short prefix is revealed.
#[braid(serde, debug = "owned", display = "owned")]
pub struct Secret;

limited_reveal!(SecretRef: "SECRET", 5);

impl Default for Secret {
    fn default() -> Self {
        Self::new(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let secret = Secret::from_static("very-secret-refresh-token");
        assert_eq!(format!("{secret:?}"), "***SECRET***");
        assert_eq!(format!("{secret}"), "***SECRET***");
    }

    #[test]
    fn alternate_formatting_reveals_a_prefix() {
        let secret = Secret::from_static("very-secret-refresh-token");
        assert_eq!(format!("{secret:#?}"), "\"very…\"");
        assert_eq!(format!("{secret:#}"), "very-secret-refresh-token");
    }

    #[test]
    fn client_ids_are_plain() {
        let id = ClientId::from_static("b6c69a37-df96-4db0-9088-2ab96e1d8215");
        assert_eq!(id.to_string(), "b6c69a37-df96-4db0-9088-2ab96e1d8215");
        assert!(ClientId::default().as_str().is_empty());
    }
}
