//! flowgated: wiring of the Flowgate components into one process.
//!
//! The binary in `main.rs` is a thin CLI over these modules; integration
//! tests drive the same [`app::App`] the daemon serves.

pub mod app;
pub mod logging;
pub mod replay;
pub mod seed;
