//! Identity types for LedgerView participants

use crate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Voting weight, an integer snapshot of holdings.
pub type Weight = u64;

/// A participant identity (wallet address or similar), case-normalized.
///
/// Two identities that differ only in case or surrounding whitespace are the
/// same identity. The normalized form is the only form ever stored, so
/// equality, hashing and serialization all agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse and normalize an identity string.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "identity".to_string(),
            });
        }
        if normalized.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(ValidationError::InvalidValue {
                field: "identity".to_string(),
                reason: format!("'{}' contains whitespace or ':'", raw.trim()),
            });
        }
        Ok(Self(normalized))
    }

    /// The normalized identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
