//! Redis backend for Tollgate locks.
//!
//! Lock records are plain Redis strings holding the owner token, with the
//! lock TTL as the key's expiry. Acquire, release and refresh each run as a
//! single Lua script, so every conditional write is atomic on the server.

mod config;
mod scripts;
mod store;

pub use config::RedisConfig;
pub use store::RedisLockStore;
