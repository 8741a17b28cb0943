//! Schema errors.

use thiserror::Error;

/// Errors produced while parsing or validating schema types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A version string is not `MAJOR.MINOR.PATCH[-pre][+build]`.
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A constraint string could not be parsed.
    #[error("invalid constraint '{input}': {reason}")]
    InvalidConstraint {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A package name is empty or unusable as a directory name.
    #[error("invalid package name '{0}'")]
    InvalidName(String),

    /// The manifest document is not valid JSON for the manifest schema.
    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// The manifest parsed but violates an invariant.
    #[error("invalid manifest: {0}")]
    Validation(String),
}

impl SchemaError {
    /// Returns `true` for syntax errors, `false` for invariant violations.
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::InvalidName(_))
    }
}
