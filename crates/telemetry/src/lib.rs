//! Internal telemetry (metrics, health, tracing) for the event streaming core.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
