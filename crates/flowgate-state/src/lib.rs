//! flowgate-state: embedded state store for Flowgate.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for use cases, flows, statistics, rollout strategies, the picker's
//! correlation cache, the durable event log, and advisory job locks.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{use_case_id}:{flow_id}`, `{event_time}:{seq}`) enable
//! ordered prefix and range scans.
//!
//! Mutations go through [`StateStore::write`], which runs a closure inside a
//! single write transaction ([`StoreTxn`]) and commits only when the closure
//! succeeds. redb admits one writer at a time, so concurrent reactions are
//! serialized rather than interleaved. Reads share the typed queries of
//! [`StateRead`] between read views and write transactions.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod error;
pub mod read;
pub mod store;
pub mod tables;
pub mod txn;
pub mod types;

pub use error::{StateError, StateResult};
pub use read::{StateRead, StateView};
pub use store::StateStore;
pub use txn::StoreTxn;
pub use types::*;
