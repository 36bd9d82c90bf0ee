//! Strong type definitions for lakeshare.
//!
//! Every identifier is a newtype so a dataset id can never be passed where
//! a share id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
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
    /// Identifier of a [`ShareObject`](crate::ShareObject).
    ShareId
);
string_id!(
    /// Identifier of a [`ShareItem`](crate::ShareItem).
    ItemId
);
string_id!(
    /// Identifier of the dataset a share draws from.
    DatasetId
);
string_id!(
    /// Identifier of the environment the principal lives in.
    EnvironmentId
);
string_id!(
    /// Identifier of the receiving principal (group or consumption role).
    PrincipalId
);
string_id!(
    /// Identifier of a shareable resource (table, prefix or bucket).
    ResourceId
);

impl ShareId {
    /// Generate a fresh random share id.
    pub fn generate() -> Self {
        Self(random_hex())
    }
}

impl ItemId {
    /// Generate a fresh random item id.
    pub fn generate() -> Self {
        Self(random_hex())
    }
}

fn random_hex() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Declares a string-backed enum whose wire names are fixed.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The exact wire name.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(CoreError::UnknownValue {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum!(
    /// The kind of principal a share targets.
    PrincipalKind ("principal kind") {
        /// A team's environment execution role.
        Group => "Group",
        /// A dedicated consumption role.
        ConsumptionRole => "ConsumptionRole",
    }
);

wire_enum!(
    /// The kind of resource a share item refers to.
    ItemKind ("item kind") {
        Table => "Table",
        StorageLocation => "StorageLocation",
        S3Bucket => "S3Bucket",
    }
);

wire_enum!(
    /// Result of the last verification pass over an item.
    HealthStatus ("health status") {
        Healthy => "Healthy",
        Unhealthy => "Unhealthy",
        PendingVerify => "PendingVerify",
        PendingReApply => "PendingReApply",
    }
);

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ShareId::generate();
        let b = ShareId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_id_display_and_debug() {
        let id = DatasetId::new("ds-1");
        assert_eq!(id.to_string(), "ds-1");
        assert_eq!(format!("{:?}", id), "DatasetId(ds-1)");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = ItemId::new("item-9");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"item-9\"");
    }

    #[test]
    fn test_wire_enum_roundtrip() {
        for kind in ItemKind::ALL {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), *kind);
        }
        assert!("Bogus".parse::<HealthStatus>().is_err());
    }
}
