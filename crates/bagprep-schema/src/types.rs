//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Scheme prefix carried by archival resource keys (`ark:/<naan>/<name>`).
pub const ARK_PREFIX: &str = "ark:/";

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Opaque identifier of a preservable object, possibly ARK-prefixed.
    ObjectId
);

string_newtype!(
    /// Hex digest recorded for a serialized bag or payload file.
    ContentHash
);

impl ObjectId {
    /// The short name of the object: the id with any `ark:/<naan>/` prefix
    /// removed. Used as the default bag directory name and cache key.
    pub fn local_name(&self) -> &str {
        match self.0.strip_prefix(ARK_PREFIX) {
            Some(rest) => match rest.split_once('/') {
                Some((_, name)) if !name.is_empty() => name,
                _ => &self.0,
            },
            None => &self.0,
        }
    }

    pub fn is_ark(&self) -> bool {
        self.0.starts_with(ARK_PREFIX)
    }
}
