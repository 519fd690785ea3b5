//! Immutable string identities for every addressable entity.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;

/// An immutable, non-empty identifier.
///
/// Equality and hashing are defined solely over the identifier string, so
/// two nodes or procedures with the same identifier collide as map keys no
/// matter what other state they carry. Cloning is cheap (shared `Arc<str>`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Creates an identity.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is empty.
    pub fn new(identifier: impl AsRef<str>) -> Result<Self, CoreError> {
        let identifier = identifier.as_ref();
        if identifier.is_empty() {
            return Err(CoreError::InvalidArgument("identifier must not be empty"));
        }
        Ok(Self(Arc::from(identifier)))
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identity").field(&&*self.0).finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets `HashMap<Identity, _>` / `DashMap<Identity, _>` be queried with `&str`.
impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Identity {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for Identity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Anything addressable by an [`Identity`].
pub trait Identified {
    /// The identity of this entity.
    fn identity(&self) -> &Identity;

    /// Shorthand for `self.identity().as_str()`.
    fn identifier(&self) -> &str {
        self.identity().as_str()
    }
}

impl Identified for Identity {
    fn identity(&self) -> &Identity {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;
    use std::hash::{Hash, Hasher};

    use super::*;

    fn hash_of(identity: &Identity) -> u64 {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn empty_identifier_is_rejected() {
        assert_eq!(
            Identity::new(""),
            Err(CoreError::InvalidArgument("identifier must not be empty"))
        );
    }

    #[test]
    fn construction_keeps_identifier() {
        let waiter = Identity::new("waiter").unwrap();
        assert_eq!(waiter.as_str(), "waiter");
        assert_eq!(waiter.identifier(), "waiter");
    }

    #[test]
    fn equality_and_hash_follow_identifier() {
        let first = Identity::new("waiter").unwrap();
        let second = Identity::new(String::from("waiter")).unwrap();
        let third = Identity::new("third waiter").unwrap();

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        assert_ne!(first, third);
    }

    #[test]
    fn set_lookup_by_str() {
        let mut set = HashSet::new();
        set.insert(Identity::new("v2").unwrap());
        assert!(set.contains("v2"));
        assert!(!set.contains("v3"));
    }
}
