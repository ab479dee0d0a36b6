//! flowgate-core: configuration and clock helpers shared by every crate.

pub mod clock;
pub mod config;

pub use clock::{epoch_millis, DAY_MS, HOUR_MS};
pub use config::FlowgateConfig;
