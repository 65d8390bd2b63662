//! Map implementations
//!
//! ## Available Maps
//!
//! - [`ConcurrentMap`]: a `HashMap` behind a reader/writer lock, with scoped
//!   guards for batching several operations into one critical section
//!
//! ## Choosing a Locking Style
//!
//! - Use the convenience methods (`get`, `set`, ...) for single operations
//! - Use [`ConcurrentMap::lock`] when a read decides a write
//! - Use [`ConcurrentMap::upgradable_read`] when most checks end without a write
//!   and plain readers should not be blocked while checking

pub mod concurrent;

pub use self::concurrent::{ConcurrentMap, MapReadGuard, MapUpgradableGuard, MapWriteGuard};


#[cfg(test)]
mod proptests;
