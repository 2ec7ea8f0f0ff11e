use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
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

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(ActionId, "Unique identifier of a queued `PendingAction`.");
newtype_string!(AutomationId, "Identifier of an `AutomationDefinition`.");
newtype_string!(TriggerId, "Identifier of a `TriggerDefinition`.");
newtype_string!(
    IdempotencyKey,
    "Caller-chosen key guaranteeing at most one logical dispatch per key."
);

impl ActionId {
    /// Generate a fresh, time-ordered action id (UUID v7).
    ///
    /// Time ordering gives a stable last-resort tiebreak when two rows share
    /// the same `next_run_at` and `created_at`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl IdempotencyKey {
    /// Generate a random key for callers that do not supply their own.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns `true` if the key uses a prefix reserved for synthetic calls
    /// (health probes and operator test sends).
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        RESERVED_KEY_PREFIXES
            .iter()
            .any(|prefix| self.0.starts_with(prefix))
    }
}

/// Key prefixes that never appear on real queue rows.
pub const RESERVED_KEY_PREFIXES: &[&str] = &["health:", "test:"];
