pub mod clock;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod interval;
pub mod key;
pub mod options;
pub mod registry;
pub mod retry;
pub mod scope;
pub mod store;
pub mod testing;
pub mod token;

pub use clock::{Clock, ManualClock, TokioClock};
pub use coordinator::LockCoordinator;
pub use error::LockError;
pub use handle::LockHandle;
pub use interval::{Interval, TimeUnit};
pub use key::{FixedKey, KeyResolver, LockKey};
pub use options::{LockOptions, LockRequest};
pub use registry::StoreRegistry;
pub use retry::Backoff;
pub use scope::LockedCall;
pub use store::LockStore;
pub use token::{LockToken, TokenGenerator, UuidTokenGenerator};
