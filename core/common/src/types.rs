//! Identifier newtypes used throughout NoteVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from a string.
            ///
            /// # Errors
            /// - Returns error if `id` is empty
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                if id.is_empty() {
                    return Err(crate::Error::InvalidInput(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(id))
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Account that owns notes and connections.
    UserId
);
string_id!(
    /// A single client installation belonging to a user.
    DeviceId
);
string_id!(
    /// Unique identifier for a note.
    NoteId
);
string_id!(
    /// Workspace grouping a user's notes.
    WorkspaceId
);
string_id!(
    /// Unique identifier for a recorded conflict.
    ConflictId
);
