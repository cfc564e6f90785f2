//! Append-only interaction log consumed by the trending engine.
//!
//! The engine only ever appends events and scans one spatial cell at a time,
//! so that is the whole surface of `InteractionStore`. `PgInteractionStore`
//! is the production backend; `MemoryInteractionStore` backs tests and local runs.

pub mod memory;
pub mod store;

pub use memory::MemoryInteractionStore;
pub use store::{InteractionStore, PgInteractionStore};
