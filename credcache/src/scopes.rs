use std::{fmt, slice};

/// An ordered set of OAuth2 scopes
///
/// Scopes keep the casing they were first inserted with, but membership is
/// decided case-insensitively, so `User.Read` and `user.read` are the same scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Produces an empty scope set
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses a space-delimited scope string, such as an item's `target`
    pub fn parse(target: &str) -> Self {
        target.split_whitespace().collect()
    }

    /// Adds a scope, returning `false` if an equivalent scope was already present
    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        let scope = scope.into();
        if scope.is_empty() || self.contains(&scope) {
            return false;
        }

        self.0.push(scope);
        true
    }

    /// Checks whether the set contains `scope`, ignoring case
    #[inline]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s.eq_ignore_ascii_case(scope))
    }

    /// Checks to see whether this set of scopes contains all of
    /// the scopes required.
    #[inline]
    pub fn contains_all<'a, I>(&self, required_scopes: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        required_scopes.into_iter().all(|s| self.contains(s))
    }

    /// Whether any scope is shared between the two sets
    #[inline]
    pub fn intersects(&self, other: &ScopeSet) -> bool {
        other.iter().any(|s| self.contains(s))
    }

    /// Produces an iterator of the scopes in this set
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        self.into_iter()
    }

    /// The number of distinct scopes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no scopes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins the scopes into the space-delimited form stored in an item's `target`
    pub fn to_target(&self) -> String {
        self.0.join(" ")
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<S: Into<String>> Extend<S> for ScopeSet {
    #[inline]
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = S>,
    {
        for scope in iter {
            self.insert(scope);
        }
    }
}

/// An iterator over a set of borrowed scopes
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: slice::Iter<'a, String>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a str;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a ScopeSet {
    type Item = &'a str;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Self::IntoIter {
            iter: self.0.iter(),
        }
    }
}
