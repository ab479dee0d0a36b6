//! flowgate-rollout: progressive rollout control for the flows of a use case.
//!
//! # Components
//!
//! - **`machine`**: allowed state transitions
//! - **`converge`**: stepwise percentage convergence
//! - **`strategy`**: configuration validation, warmup and rollback targets
//! - **`controller`**: `RolloutController`, the reactions and manual commands

pub mod controller;
pub mod converge;
pub mod error;
pub mod machine;
pub mod strategy;

pub use controller::{Reaction, RolloutController};
pub use converge::{converge, round2};
pub use error::{RolloutError, RolloutResult};
pub use machine::{allowed_targets, check_transition};
