//! flowgate-events: the event bus connecting picker, statistics and
//! rollout control.
//!
//! Producers append events to the durable log inside their own store
//! transaction ([`EventBus::persist`]) and hand the returned handles to
//! [`EventBus::publish_all`] once the transaction has committed, so
//! consumers never observe a rolled-back mutation.
//!
//! # Architecture
//!
//! ```text
//! producer txn ──persist──▶ events table (redb)
//!      │ commit
//!      ▼
//! publish_all ──▶ topic outbox ──▶ dispatcher ──▶ subscriber queue ──▶ handler
//!                 (never blocks)                 (bounded, per subscriber)
//!
//! replay ◀── events table, decoded through DecoderRegistry
//! ```
//!
//! Every subscriber runs a supervised loop ([`Subscription::spawn`]) that
//! logs and skips a failing or panicking message instead of terminating.

pub mod bus;
pub mod diff;
pub mod error;
pub mod event;
pub mod registry;

pub use bus::{BusConfig, Delivery, EventBus, EventHandle, EventHandler, PublishMode, Subscription};
pub use diff::changed_fields;
pub use error::{EventError, EventResult};
pub use event::{Event, EventPayload, EventType, topics};
pub use registry::DecoderRegistry;
