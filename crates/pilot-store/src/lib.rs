//! Store seam for the pilot trading agent.
//!
//! The agent treats persistence as an opaque transactional table store with
//! query-by-index support. This crate defines one trait per table family,
//! dyn-compatible via boxed futures so implementations can be remote, and
//! ships [`MemStore`], a DashMap-backed implementation used by tests and
//! single-process deployments.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemStore;
pub use traits::{BoxFuture, BreakerStore, LockStore, PositionStore, Store, TradeStore};
