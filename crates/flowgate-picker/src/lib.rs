//! flowgate-picker: maps each inbound request to one flow of a use case.
//!
//! # Components
//!
//! - **`select`**: weighted random sampling over the active flows
//! - **`picker`**: the pick operation (correlation stickiness, audit
//!   trail, match events) and the correlation purge
//! - **`error`**: picker error kinds and their boundary codes

pub mod error;
pub mod picker;
pub mod select;

pub use error::{PickerError, PickerResult};
pub use picker::{CommittedPick, PickRequest, PickResult, Picker};
pub use select::select_weighted;
