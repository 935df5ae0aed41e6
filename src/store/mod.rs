//! Backing store abstraction for entity and reading queries
//!
//! The hosted data platform is an external collaborator. This module defines
//! the narrow surface the telemetry core needs from it:
//!
//! - **Queries**: apiaries, hives, and time-bounded readings per node
//! - **Live feed**: a stream of newly inserted readings for one node
//!
//! ## Backends
//!
//! - **Memory**: in-process store with a working live feed, used by tests and demos
//! - **REST**: the platform's filter-by-equality REST dialect over `reqwest`.
//!   It has no push transport, so live updates fall back to polling.

pub mod backend;
pub mod error;
pub mod memory;
pub mod rest;

pub use backend::{BackingStore, ReadingFeed, ReadingQuery, ReadingStream, TelemetryStore};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use rest::RestStore;
