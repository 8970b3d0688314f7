//! NewType wrappers for the public halves of split tokens and other identifiers.
//!
//! Only values that are safe to log get a newtype here. Secrets stay plain
//! `String`s inside the stores and are never formatted into log fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Public half of a signin token (the first four characters).
    ///
    /// Safe to log. Several requests may share an id; the secret breaks ties.
    SigninId
);

newtype_string!(
    /// Public half of a session token carried in the `session` cookie.
    SessionId
);

newtype_string!(
    /// Stable identifier of a user row, minted once per distinct public key.
    UserId
);

newtype_string!(
    /// OpenSSH style display string for a public key (`SHA256:...`).
    Fingerprint
);
