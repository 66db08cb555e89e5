//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{Error, Result};

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        define_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: impl Into<String>) -> Result<Self> {
                let s = s.into();
                if s.is_empty() {
                    return Err(Error::validation(concat!(
                        stringify!($name),
                        " cannot be empty"
                    )));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(Uid, uuid);
define_id!(FieldManager);

/// Namespace-qualified object name; the work queue key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse the `namespace/name` form.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::validation(format!(
                "object key must be namespace/name, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_round_trips_through_display() {
        let key = ObjectKey::new("kyma-system", "sample-a");
        assert_eq!(key.to_string(), "kyma-system/sample-a");
        assert_eq!(ObjectKey::parse("kyma-system/sample-a").unwrap(), key);
    }

    #[test]
    fn test_object_key_rejects_malformed() {
        assert!(ObjectKey::parse("no-namespace").is_err());
        assert!(ObjectKey::parse("/name").is_err());
        assert!(ObjectKey::parse("ns/").is_err());
        assert!(ObjectKey::parse("a/b/c").is_err());
    }

    #[test]
    fn test_field_manager_must_not_be_empty() {
        assert!(FieldManager::from_string("").is_err());
        let fm = FieldManager::from_string("sample.kyma-project.io/owner").unwrap();
        assert_eq!(fm.as_str(), "sample.kyma-project.io/owner");
    }

    #[test]
    fn test_uids_are_unique() {
        assert_ne!(Uid::new(), Uid::new());
    }
}
