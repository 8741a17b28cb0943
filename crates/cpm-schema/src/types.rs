//! Package names.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

use crate::SchemaError;

/// A normalized package name.
///
/// Names are lowercased and must be usable as a single directory component
/// under `cpm_modules/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing the input to lowercase.
    ///
    /// No validation is performed; use [`PackageName::parse`] for untrusted input.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    /// Parse and validate a package name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidName`] if the name is empty, contains
    /// whitespace or a path separator, or is a relative path component.
    pub fn parse(name: &str) -> Result<Self, SchemaError> {
        let candidate = Self::new(name);
        let s = candidate.as_str();
        if s.is_empty()
            || s == "."
            || s == ".."
            || s.chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '\\' || c == '@')
        {
            return Err(SchemaError::InvalidName(name.to_string()));
        }
        Ok(candidate)
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PackageName {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case() {
        let name = PackageName::new("LibMath");
        assert_eq!(name.as_str(), "libmath");
        assert_eq!(name, "LIBMATH");
    }

    #[test]
    fn test_parse_rejects_path_like_names() {
        assert!(PackageName::parse("").is_err());
        assert!(PackageName::parse("..").is_err());
        assert!(PackageName::parse("a/b").is_err());
        assert!(PackageName::parse("lib math").is_err());
        assert!(PackageName::parse("zlib@1.0.0").is_err());
        assert!(PackageName::parse("libutils").is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<PackageName, _> = serde_json::from_str("\"zlib\"");
        assert!(ok.is_ok());
        let bad: Result<PackageName, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }
}
