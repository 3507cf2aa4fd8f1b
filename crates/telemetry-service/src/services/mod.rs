//! Service layer.
//!
//! - `query` - Device listing, history and statistics
//! - `health` - Composite health of broker link and store

pub mod health;
pub mod query;

pub use health::{ComponentState, HealthAggregator, HealthReport, HealthStatus};
pub use query::QueryService;
