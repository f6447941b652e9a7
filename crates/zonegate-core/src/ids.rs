//! Core identifier types for zonegate.
//!
//! This module provides strongly-typed identifiers for zones, packages,
//! package APIs, and target clusters. All IDs are printable strings that are
//! safe to embed in storage keys: they are non-empty and never contain the
//! NUL byte used as the key separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when constructing identifiers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    /// The identifier was empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The identifier contained a byte that is reserved for key encoding.
    #[error("identifier contains reserved byte 0x00: {0:?}")]
    ReservedByte(String),
}

fn validate(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.bytes().any(|b| b == 0) {
        return Err(IdError::ReservedByte(value.to_string()));
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating key-safety.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty or contains a NUL byte.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate(&value)?;
                Ok(Self(value))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the identifier's raw bytes (for key encoding).
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identifier of a Zone: the unit of routing configuration, mapped 1:1
    /// to one ingress object.
    ZoneId
}

string_id! {
    /// Identifier of an API package (owns one or more zones).
    PackageId
}

string_id! {
    /// Identifier of a single API within a package.
    PackageApiId
}

string_id! {
    /// Identity of the availability zone / target cluster used as lock and
    /// deployment scope.
    ClusterKey
}

impl ClusterKey {
    /// Stable 64-bit hash of the cluster key.
    ///
    /// Deterministic across processes and insertion orders; used to pick a
    /// lock bucket and to derive per-cluster singleton artifact names.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        let digest = blake3::hash(self.0.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_reserved() {
        assert_eq!(ZoneId::new(""), Err(IdError::Empty));
        assert!(matches!(
            ZoneId::new("bad\0id"),
            Err(IdError::ReservedByte(_))
        ));
    }

    #[test]
    fn display_and_parse_roundtrip() {
        let id = PackageId::new("orders").unwrap();
        assert_eq!(id.to_string(), "orders");
        assert_eq!("orders".parse::<PackageId>().unwrap(), id);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ZoneId::new("pkg-orders").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pkg-orders\"");
        let back: ZoneId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_rejects_invalid() {
        let result: Result<ZoneId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn cluster_hash_is_stable() {
        let a = ClusterKey::new("prod-east").unwrap();
        let b = ClusterKey::new("prod-east").unwrap();
        let c = ClusterKey::new("prod-west").unwrap();

        assert_eq!(a.stable_hash(), b.stable_hash());
        assert_ne!(a.stable_hash(), c.stable_hash());
    }
}
