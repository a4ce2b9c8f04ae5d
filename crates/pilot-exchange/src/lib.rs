//! Exchange client seam.
//!
//! The exchange is the sole source of truth for position state. This crate
//! defines the trait the rest of the system talks through plus the
//! wire-free types it exchanges; signing and transport live behind
//! implementations of [`ExchangeClient`] and are out of scope here.
//!
//! [`MockExchange`] is the recording test double used across the
//! workspace's tests: scriptable per-operation failures, settable position
//! and price state, and a full call log.

pub mod client;
pub mod mock;
pub mod types;

pub use client::{BoxFuture, DynExchange, ExchangeClient, ExchangeError, ExchangeResult};
pub use mock::{ExchangeCall, MockExchange};
pub use types::{ExchangePosition, OpenOrder, OrderAck, OrderFill, OrderKind, OrderRequest};
