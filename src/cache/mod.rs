//! Intercepting response cache for offline support.
//!
//! Every request the application issues passes through a worker that picks a
//! strategy per request:
//! - remote API traffic is network-first, written back to the remote-data
//!   generation and served from it when the network is down
//! - everything else is cache-first against the static asset generation
//!
//! Generations are versioned by name; activating a new release purges the
//! caches left behind by older ones.

mod generation;
mod layer;
mod storage;
mod traits;
mod worker;

pub use generation::{Generation, Release};
pub(crate) use layer::blocking;
pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheError, CacheStorage, InstallError};
pub use worker::{WorkerHandle, WorkerState};
