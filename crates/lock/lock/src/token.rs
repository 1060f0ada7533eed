use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque credential proving ownership of one acquisition.
///
/// The token is written alongside the key in the store and is the only thing
/// that allows a holder to release or refresh its lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh ownership tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> LockToken;
}

/// Generates random UUID v4 tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenGenerator;

impl TokenGenerator for UuidTokenGenerator {
    fn generate(&self) -> LockToken {
        LockToken(Uuid::new_v4().to_string())
    }
}
