//! Row identifiers for the dictionary tables.
//!
//! Every dictionary table assigns its own monotonically increasing ids,
//! starting at 1. Ids are never reused within a database lifetime, so an
//! id observed by a reader either still names the same row or names nothing.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw row id.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw row id.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Id of a term kind (`label`, `description`, `alias`).
    TypeId
);

row_id!(
    /// Id of a raw text string, shared across languages.
    TextId
);

row_id!(
    /// Id of a (language, text) pair.
    TextInLangId
);

row_id!(
    /// Id of a (type, language, text) triple: the unit entities reference.
    TermInLangId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_raw_value() {
        assert!(TermInLangId::new(2) < TermInLangId::new(10));
        assert_eq!(u64::from(TextId::new(7)), 7);
        assert_eq!(TypeId::from(3).to_string(), "3");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&TextInLangId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: TextInLangId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(), 42);
    }
}
