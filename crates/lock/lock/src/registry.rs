use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, TokioClock};
use crate::coordinator::LockCoordinator;
use crate::error::LockError;
use crate::store::LockStore;

/// Named lock stores, so callers can pick a backend by name.
///
/// Every coordinator handed out shares the registry's clock.
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn LockStore>>,
    clock: Arc<dyn Clock>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self {
            stores: HashMap::new(),
            clock: Arc::new(TokioClock),
        }
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a store under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn LockStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LockStore>> {
        self.stores.get(name).cloned()
    }

    /// Registered store names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a coordinator over the store registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if no store has that name.
    pub fn coordinator(&self, name: &str) -> Result<LockCoordinator, LockError> {
        let store = self.get(name).ok_or_else(|| {
            LockError::InvalidConfiguration(format!(
                "unknown lock store: {name} (registered: {})",
                self.names().join(", ")
            ))
        })?;
        Ok(LockCoordinator::new(store).with_clock(Arc::clone(&self.clock)))
    }
}
