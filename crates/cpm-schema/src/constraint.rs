//! Version constraints, in the npm-like syntax used by manifests.
//!
//! | syntax            | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `*`, `latest`, `` | any version                               |
//! | `1.2.3`, `=1.2.3` | exactly 1.2.3                             |
//! | `^1.2.3`          | same major, `>= 1.2.3`                    |
//! | `~1.2.3`          | same major and minor, `>= 1.2.3`          |
//! | `<`, `<=`, `>`, `>=` | the obvious comparison                 |
//! | `1.0.0 - 2.0.0`   | inclusive range                           |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{SchemaError, Version};

/// A predicate over versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Constraint {
    /// Any version.
    Any,
    /// Exactly this version.
    Exact(Version),
    /// Same major, at least this version.
    Caret(Version),
    /// Same major and minor, at least this version.
    Tilde(Version),
    /// Strictly lower.
    Lt(Version),
    /// Lower or equal.
    Lte(Version),
    /// Strictly greater.
    Gt(Version),
    /// Greater or equal.
    Gte(Version),
    /// Inclusive range `lo ..= hi`.
    Range(Version, Version),
}

impl Constraint {
    /// Parse a constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidConstraint`] if the operator's operand is
    /// not a valid version or a range has its bounds reversed.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let s = input.trim();
        let invalid = |reason: String| SchemaError::InvalidConstraint {
            input: input.to_string(),
            reason,
        };
        let version = |operand: &str| Version::parse(operand).map_err(|e| invalid(e.to_string()));

        if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Any);
        }

        if let Some((lo, hi)) = s.split_once(" - ") {
            let lo = version(lo)?;
            let hi = version(hi)?;
            if lo > hi {
                return Err(invalid(format!("lower bound {lo} exceeds upper bound {hi}")));
            }
            return Ok(Self::Range(lo, hi));
        }

        // Two-character operators must be tested before their one-character prefixes.
        let parsed = if let Some(rest) = s.strip_prefix(">=") {
            Self::Gte(version(rest)?)
        } else if let Some(rest) = s.strip_prefix("<=") {
            Self::Lte(version(rest)?)
        } else if let Some(rest) = s.strip_prefix('>') {
            Self::Gt(version(rest)?)
        } else if let Some(rest) = s.strip_prefix('<') {
            Self::Lt(version(rest)?)
        } else if let Some(rest) = s.strip_prefix('^') {
            Self::Caret(version(rest)?)
        } else if let Some(rest) = s.strip_prefix('~') {
            Self::Tilde(version(rest)?)
        } else if let Some(rest) = s.strip_prefix('=') {
            Self::Exact(version(rest)?)
        } else {
            Self::Exact(version(s)?)
        };

        Ok(parsed)
    }

    /// Returns `true` if `v` is in the set this constraint describes.
    pub fn satisfies(&self, v: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(want) => v == want,
            Self::Caret(base) => v.major() == base.major() && v >= base,
            Self::Tilde(base) => v.major() == base.major() && v.minor() == base.minor() && v >= base,
            Self::Lt(bound) => v < bound,
            Self::Lte(bound) => v <= bound,
            Self::Gt(bound) => v > bound,
            Self::Gte(bound) => v >= bound,
            Self::Range(lo, hi) => v >= lo && v <= hi,
        }
    }

    /// The satisfying subset of `versions`, in input order.
    pub fn filter<'a, I>(&self, versions: I) -> Vec<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().filter(|v| self.satisfies(v)).collect()
    }

    /// The highest satisfying version.
    ///
    /// Among equal triples a release wins over a prerelease, and prereleases
    /// are ordered by their identifiers.
    pub fn select_highest<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().filter(|v| self.satisfies(v)).max()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Caret(v) => write!(f, "^{v}"),
            Self::Tilde(v) => write!(f, "~{v}"),
            Self::Lt(v) => write!(f, "<{v}"),
            Self::Lte(v) => write!(f, "<={v}"),
            Self::Gt(v) => write!(f, ">{v}"),
            Self::Gte(v) => write!(f, ">={v}"),
            Self::Range(lo, hi) => write!(f, "{lo} - {hi}"),
        }
    }
}

impl FromStr for Constraint {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Constraint {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Constraint> for String {
    fn from(c: Constraint) -> Self {
        c.to_string()
    }
}
