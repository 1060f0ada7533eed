use serde::{Deserialize, Serialize};

use crate::error::LockError;

/// Address of a lock: a key scoped to one named store.
///
/// Contention is per `(store_id, key)` pair. Both parts are guaranteed to be
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    store_id: String,
    key: String,
}

impl LockKey {
    /// Create a new lock key.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if either part is empty.
    pub fn new(store_id: impl Into<String>, key: impl Into<String>) -> Result<Self, LockError> {
        let store_id = store_id.into();
        let key = key.into();
        if store_id.is_empty() {
            return Err(LockError::InvalidConfiguration(
                "store id must not be empty".into(),
            ));
        }
        if key.is_empty() {
            return Err(LockError::InvalidConfiguration(
                "lock key must not be empty".into(),
            ));
        }
        Ok(Self { store_id, key })
    }

    /// The logical store namespace (a table, collection, or key prefix).
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// The resolved lock identifier within the store.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return a canonical string representation: `store_id/key`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.store_id, self.key)
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.store_id, self.key)
    }
}

/// Derives the lock identifier for a call from its arguments.
///
/// Any `Fn(&A) -> String` is a resolver, so callers usually pass a closure.
pub trait KeyResolver<A: ?Sized>: Send + Sync {
    fn resolve(&self, args: &A) -> String;
}

impl<A: ?Sized, F> KeyResolver<A> for F
where
    F: Fn(&A) -> String + Send + Sync,
{
    fn resolve(&self, args: &A) -> String {
        self(args)
    }
}

/// Resolver that ignores the arguments and always yields the same key.
#[derive(Debug, Clone)]
pub struct FixedKey(pub String);

impl<A: ?Sized> KeyResolver<A> for FixedKey {
    fn resolve(&self, _args: &A) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_parts() {
        assert!(matches!(
            LockKey::new("", "job"),
            Err(LockError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            LockKey::new("lock", ""),
            Err(LockError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn canonical_form() {
        let key = LockKey::new("lock", "lock:job:42").unwrap();
        assert_eq!(key.canonical(), "lock/lock:job:42");
        assert_eq!(key.to_string(), key.canonical());
        assert_eq!(key.store_id(), "lock");
        assert_eq!(key.key(), "lock:job:42");
    }

    #[test]
    fn same_key_in_different_stores_differs() {
        let a = LockKey::new("jobs", "42").unwrap();
        let b = LockKey::new("reports", "42").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |id: &u64| format!("job:{id}");
        assert_eq!(resolver.resolve(&42), "job:42");
        assert_eq!(KeyResolver::<str>::resolve(&FixedKey("nightly".into()), "x"), "nightly");
    }
}
