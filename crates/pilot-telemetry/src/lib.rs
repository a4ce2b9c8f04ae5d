//! Structured logging for the pilot trading agent.

pub mod error;
pub mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
